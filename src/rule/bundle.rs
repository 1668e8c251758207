use serde::{Deserialize, Serialize};

use crate::{
    error::RuleError,
    model::{ComponentRule, ComponentType, ControllerMethod},
};

/// Portable rule set for one package, used for backup/restore and sharing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleBundle {
    pub package_name: String,
    pub version_name: Option<String>,
    pub version_code: Option<i64>,
    pub author: Option<String>,
    pub components: Vec<ComponentRule>,
}

impl RuleBundle {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleWire {
    #[serde(default)]
    package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(default)]
    components: Vec<ComponentWire>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    package_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    component_type: Option<String>,
    #[serde(default)]
    state: Option<bool>,
    #[serde(default)]
    method: Option<String>,
}

/// Decode and validate a JSON rule bundle
///
/// Every field of every component is checked; nothing is defaulted. A component
/// without `packageName` belongs to the bundle's package.
pub fn decode(json: &str) -> Result<RuleBundle, RuleError> {
    let wire: BundleWire = serde_json::from_str(json)?;

    let package_name = non_empty(wire.package_name).ok_or(RuleError::MalformedBundle {
        field: "packageName",
        reason: "is missing or empty".to_string(),
    })?;

    let components = wire
        .components
        .into_iter()
        .enumerate()
        .map(|(index, component)| validate(index, component, &package_name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RuleBundle {
        package_name,
        version_name: wire.version_name,
        version_code: wire.version_code,
        author: wire.author,
        components,
    })
}

/// Encode a bundle as pretty-printed JSON
pub fn encode(bundle: &RuleBundle) -> Result<String, RuleError> {
    if bundle.package_name.trim().is_empty() {
        return Err(RuleError::MalformedBundle {
            field: "packageName",
            reason: "is empty".to_string(),
        });
    }

    let components = bundle
        .components
        .iter()
        .enumerate()
        .map(|(index, rule)| {
            if rule.package_name.trim().is_empty() {
                return Err(malformed(index, "packageName", "is empty"));
            }
            if rule.name.trim().is_empty() {
                return Err(malformed(index, "name", "is empty"));
            }
            Ok(ComponentWire {
                package_name: Some(rule.package_name.clone()),
                name: Some(rule.name.clone()),
                component_type: Some(rule.component_type.as_str().to_string()),
                state: Some(rule.state),
                method: Some(rule.method.as_str().to_string()),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let wire = BundleWire {
        package_name: Some(bundle.package_name.clone()),
        version_name: bundle.version_name.clone(),
        version_code: bundle.version_code,
        author: bundle.author.clone(),
        components,
    };
    Ok(serde_json::to_string_pretty(&wire)?)
}

fn validate(
    index: usize,
    component: ComponentWire,
    bundle_package: &str,
) -> Result<ComponentRule, RuleError> {
    let package_name = match component.package_name {
        None => bundle_package.to_string(),
        Some(name) => non_empty(Some(name))
            .ok_or_else(|| malformed(index, "packageName", "is empty"))?,
    };
    let name = non_empty(component.name)
        .ok_or_else(|| malformed(index, "name", "is missing or empty"))?;
    let component_type = component
        .component_type
        .ok_or_else(|| malformed(index, "type", "is missing"))?
        .parse::<ComponentType>()
        .map_err(|reason| malformed(index, "type", &reason))?;
    let state = component
        .state
        .ok_or_else(|| malformed(index, "state", "is missing"))?;
    let method = component
        .method
        .ok_or_else(|| malformed(index, "method", "is missing"))?
        .parse::<ControllerMethod>()
        .map_err(|reason| malformed(index, "method", &reason))?;

    Ok(ComponentRule {
        package_name,
        name,
        component_type,
        state,
        method,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn malformed(index: usize, field: &'static str, reason: &str) -> RuleError {
    RuleError::MalformedRule {
        index,
        field,
        reason: reason.to_string(),
    }
}
