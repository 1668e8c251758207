use serde::{Deserialize, Serialize};

use crate::{
    error::ControlError,
    model::{Component, ComponentType},
};

// On-disk shape of an intent firewall file:
//
// <rules>
//   <activity block="true" log="false">
//     <component-filter name="com.example/com.example.MainActivity" />
//   </activity>
//   <broadcast ...>, <service ...>, <provider ...>
// </rules>

// A kind may appear in several elements, also interleaved with other kinds
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "rules")]
struct RulesXml {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    activity: Vec<SectionXml>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    broadcast: Vec<SectionXml>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    service: Vec<SectionXml>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    provider: Vec<SectionXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SectionXml {
    #[serde(rename = "@block", default = "default_block")]
    block: bool,
    #[serde(rename = "@log", default)]
    log: bool,
    #[serde(rename = "component-filter", default)]
    component_filter: Vec<ComponentFilterXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ComponentFilterXml {
    #[serde(rename = "@name")]
    name: String,
}

fn default_block() -> bool {
    true
}

/// Blocked components of one package, grouped by IFW section
///
/// Entries are flattened `package/class` names kept in insertion order, so a
/// read-modify-write cycle leaves untouched entries where they were.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfwRuleDocument {
    package_name: String,
    activity: Vec<String>,
    broadcast: Vec<String>,
    service: Vec<String>,
    provider: Vec<String>,
}

impl IfwRuleDocument {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            activity: Vec::new(),
            broadcast: Vec::new(),
            service: Vec::new(),
            provider: Vec::new(),
        }
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Parse an IFW file
    ///
    /// Names are normalized to `package/fully.qualified.Class`. Sections with
    /// `block="false"` only log intents and are not treated as blocks. Duplicate
    /// entries collapse into one.
    pub fn from_xml(package_name: &str, content: &str) -> Result<Self, ControlError> {
        let parsed: RulesXml =
            quick_xml::de::from_str(content).map_err(|source| ControlError::SerializationFailed {
                package: package_name.to_string(),
                reason: source.to_string(),
            })?;

        let mut document = Self::new(package_name);
        let sections = [
            (ComponentType::Activity, parsed.activity),
            (ComponentType::Receiver, parsed.broadcast),
            (ComponentType::Service, parsed.service),
            (ComponentType::Provider, parsed.provider),
        ];
        for (component_type, section) in sections
            .into_iter()
            .flat_map(|(component_type, elements)| {
                elements.into_iter().map(move |section| (component_type, section))
            })
        {
            if !section.block {
                log::debug!(
                    "Ignoring non-blocking {} section in IFW rules of {package_name}",
                    component_type
                );
                continue;
            }
            for filter in section.component_filter {
                match Component::unflatten(&filter.name, component_type) {
                    Some(component) => {
                        document.insert(&component);
                    }
                    None => log::warn!(
                        "Skipping invalid component-filter '{}' in IFW rules of {package_name}",
                        filter.name
                    ),
                }
            }
        }
        Ok(document)
    }

    /// Serialize to the IFW XML format; empty sections are omitted
    pub fn to_xml(&self) -> Result<String, ControlError> {
        let rules = RulesXml {
            activity: section(&self.activity),
            broadcast: section(&self.broadcast),
            service: section(&self.service),
            provider: section(&self.provider),
        };

        let mut buffer = String::new();
        let mut serializer = quick_xml::se::Serializer::new(&mut buffer);
        serializer.indent(' ', 2);
        rules
            .serialize(serializer)
            .map_err(|source| ControlError::SerializationFailed {
                package: self.package_name.clone(),
                reason: source.to_string(),
            })?;
        buffer.push('\n');
        Ok(buffer)
    }

    /// Add a component; returns false when it was already listed
    pub fn insert(&mut self, component: &Component) -> bool {
        let flat = component.flatten();
        let entries = self.section_mut(component.component_type);
        if entries.contains(&flat) {
            return false;
        }
        entries.push(flat);
        true
    }

    /// Remove a component; returns false when it was not listed
    pub fn remove(&mut self, component: &Component) -> bool {
        let flat = component.flatten();
        let entries = self.section_mut(component.component_type);
        match entries.iter().position(|entry| *entry == flat) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, component: &Component) -> bool {
        self.section(component.component_type)
            .contains(&component.flatten())
    }

    pub fn len(&self) -> usize {
        self.activity.len() + self.broadcast.len() + self.service.len() + self.provider.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All blocked components, section by section
    pub fn components(&self) -> Vec<Component> {
        ComponentType::ALL
            .iter()
            .flat_map(|&component_type| {
                self.section(component_type)
                    .iter()
                    .filter_map(move |flat| Component::unflatten(flat, component_type))
            })
            .collect()
    }

    fn section(&self, component_type: ComponentType) -> &Vec<String> {
        match component_type {
            ComponentType::Activity => &self.activity,
            ComponentType::Receiver => &self.broadcast,
            ComponentType::Service => &self.service,
            ComponentType::Provider => &self.provider,
        }
    }

    fn section_mut(&mut self, component_type: ComponentType) -> &mut Vec<String> {
        match component_type {
            ComponentType::Activity => &mut self.activity,
            ComponentType::Receiver => &mut self.broadcast,
            ComponentType::Service => &mut self.service,
            ComponentType::Provider => &mut self.provider,
        }
    }
}

fn section(entries: &[String]) -> Vec<SectionXml> {
    if entries.is_empty() {
        return Vec::new();
    }
    vec![SectionXml {
        block: true,
        log: false,
        component_filter: entries
            .iter()
            .map(|name| ComponentFilterXml { name: name.clone() })
            .collect(),
    }]
}
