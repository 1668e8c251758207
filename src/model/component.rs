use std::{fmt, str::FromStr};

/// Kind of a manifest-declared component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentType {
    Activity,
    Service,
    Receiver,
    Provider,
}

impl ComponentType {
    pub const ALL: [ComponentType; 4] = [
        ComponentType::Activity,
        ComponentType::Service,
        ComponentType::Receiver,
        ComponentType::Provider,
    ];

    /// Name used in rule bundles
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Activity => "ACTIVITY",
            ComponentType::Service => "SERVICE",
            ComponentType::Receiver => "RECEIVER",
            ComponentType::Provider => "PROVIDER",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVITY" => Ok(ComponentType::Activity),
            "SERVICE" => Ok(ComponentType::Service),
            "RECEIVER" => Ok(ComponentType::Receiver),
            "PROVIDER" => Ok(ComponentType::Provider),
            other => Err(format!("unknown component type '{other}'")),
        }
    }
}

/// Mechanism used to control a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControllerMethod {
    /// `pm enable` / `pm disable`, flips the manifest enabled state
    PackageManager,
    /// Intent firewall rule file under /data/system/ifw
    IntentFirewall,
}

impl ControllerMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerMethod::PackageManager => "PM",
            ControllerMethod::IntentFirewall => "IFW",
        }
    }
}

impl fmt::Display for ControllerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PM" | "PACKAGE_MANAGER" => Ok(ControllerMethod::PackageManager),
            "IFW" | "INTENT_FIREWALL" => Ok(ControllerMethod::IntentFirewall),
            other => Err(format!("unknown controller method '{other}'")),
        }
    }
}

/// Identity of one manifest component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Component {
    pub package_name: String,
    /// Fully qualified class name
    pub name: String,
    pub component_type: ComponentType,
}

impl Component {
    pub fn new(
        package_name: impl Into<String>,
        name: impl Into<String>,
        component_type: ComponentType,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            name: name.into(),
            component_type,
        }
    }

    /// `package/class`, the form understood by `pm` and IFW component filters
    pub fn flatten(&self) -> String {
        format!("{}/{}", self.package_name, self.name)
    }

    /// Parse `package/class` (or `package/.Class`) into a component of the given type
    pub fn unflatten(flat: &str, component_type: ComponentType) -> Option<Self> {
        let (package_name, class) = flat.trim().split_once('/')?;
        if package_name.is_empty() || class.is_empty() {
            return None;
        }
        let name = if class.starts_with('.') {
            format!("{package_name}{class}")
        } else {
            class.to_string()
        };
        Some(Self::new(package_name, name, component_type))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.flatten(), self.component_type)
    }
}

/// Desired state of one component under one controller method
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentRule {
    pub package_name: String,
    pub name: String,
    pub component_type: ComponentType,
    /// true = enabled / unblocked
    pub state: bool,
    pub method: ControllerMethod,
}

impl ComponentRule {
    pub fn component(&self) -> Component {
        Component::new(&self.package_name, &self.name, self.component_type)
    }

    pub fn from_component(component: &Component, state: bool, method: ControllerMethod) -> Self {
        Self {
            package_name: component.package_name.clone(),
            name: component.name.clone(),
            component_type: component.component_type,
            state,
            method,
        }
    }
}
