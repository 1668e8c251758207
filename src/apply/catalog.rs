use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::{
    error::ControlError,
    model::{Component, ComponentType},
    shell::{PrivilegedShell, quote},
};

/// Read-only view of the components installed on the device
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComponentCatalog: Send + Sync + 'static {
    /// Whether the component exists with this type
    async fn contains(&self, component: &Component) -> bool;

    /// Components of `package_name` the catalog can enumerate with their type
    async fn components(&self, package_name: &str) -> Result<Vec<Component>, ControlError>;
}

/// What `dumpsys package` and `pm path` tell about one package
#[derive(Debug, Default)]
struct PackageManifest {
    installed: bool,
    /// Components reachable through intent filters or the provider registry
    declared: Vec<Component>,
    apks: Vec<String>,
}

/// Catalog answered by the device's package manager through the privileged shell
///
/// `dumpsys package` only names components that have intent filters or are
/// providers. Any other class is looked up as a type descriptor in the
/// package's dex files.
pub struct DeviceCatalog {
    shell: Arc<dyn PrivilegedShell>,
    packages: Mutex<HashMap<String, Arc<PackageManifest>>>,
}

impl DeviceCatalog {
    pub fn new(shell: Arc<dyn PrivilegedShell>) -> Self {
        Self {
            shell,
            packages: Mutex::new(HashMap::new()),
        }
    }

    async fn manifest(&self, package_name: &str) -> Result<Arc<PackageManifest>, ControlError> {
        if let Some(manifest) = self
            .packages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(package_name)
        {
            return Ok(Arc::clone(manifest));
        }

        let dump = self
            .shell
            .run_command(&format!("dumpsys package {}", quote(package_name)))
            .await?;
        let manifest = if dump.stdout.contains(&format!("Package [{package_name}]")) {
            let paths = self
                .shell
                .run_command(&format!("pm path {}", quote(package_name)))
                .await?;
            PackageManifest {
                installed: true,
                declared: parse_declared_components(&dump.stdout, package_name),
                apks: paths
                    .stdout
                    .lines()
                    .filter_map(|line| line.trim().strip_prefix("package:"))
                    .map(str::to_string)
                    .collect(),
            }
        } else {
            log::debug!("{package_name} is not installed");
            PackageManifest::default()
        };

        let manifest = Arc::new(manifest);
        self.packages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(package_name.to_string(), Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Whether the class is defined in one of the package's dex files
    async fn defined_in_apk(
        &self,
        manifest: &PackageManifest,
        component: &Component,
    ) -> Result<bool, ControlError> {
        if manifest.apks.is_empty() {
            return Ok(false);
        }
        let apks: Vec<String> = manifest.apks.iter().map(|apk| quote(apk)).collect();
        let descriptor = format!("L{};", component.name.replace('.', "/"));
        let command = format!(
            "for apk in {}; do unzip -p \"$apk\" 'classes*.dex' 2>/dev/null; done | grep -c -a -F {}",
            apks.join(" "),
            quote(&descriptor)
        );
        let output = self.shell.run_command(&command).await?;
        let matches: usize =
            output
                .stdout
                .trim()
                .parse()
                .map_err(|_| ControlError::OperationFailed {
                    component: component.flatten(),
                    reason: format!("cannot inspect dex files: {}", output.combined().trim()),
                })?;
        Ok(matches > 0)
    }
}

#[async_trait]
impl ComponentCatalog for DeviceCatalog {
    async fn contains(&self, component: &Component) -> bool {
        let manifest = match self.manifest(&component.package_name).await {
            Ok(manifest) => manifest,
            Err(err) => {
                log::error!("Cannot look up {}: {err}", component.package_name);
                return false;
            }
        };
        if !manifest.installed {
            return false;
        }
        if let Some(declared) = manifest
            .declared
            .iter()
            .find(|declared| declared.name == component.name)
        {
            return declared.component_type == component.component_type;
        }
        match self.defined_in_apk(&manifest, component).await {
            Ok(found) => found,
            Err(err) => {
                log::error!("Cannot look up {component}: {err}");
                false
            }
        }
    }

    async fn components(&self, package_name: &str) -> Result<Vec<Component>, ControlError> {
        let manifest = self.manifest(package_name).await?;
        if !manifest.installed {
            return Err(ControlError::ComponentNotFound {
                component: package_name.to_string(),
            });
        }
        Ok(manifest.declared.clone())
    }
}

fn table_type(header: &str) -> Option<ComponentType> {
    match header {
        "Activity Resolver Table:" => Some(ComponentType::Activity),
        "Receiver Resolver Table:" => Some(ComponentType::Receiver),
        "Service Resolver Table:" => Some(ComponentType::Service),
        "Provider Resolver Table:" | "Registered ContentProviders:" => Some(ComponentType::Provider),
        _ => None,
    }
}

/// Components of `package_name` named in the resolver tables and provider registry
pub(crate) fn parse_declared_components(dumpsys: &str, package_name: &str) -> Vec<Component> {
    let prefix = format!("{package_name}/");
    let mut table = None;
    let mut declared: Vec<Component> = Vec::new();

    for line in dumpsys.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(' ') {
            table = table_type(line.trim());
            continue;
        }
        let Some(component_type) = table else {
            continue;
        };
        for token in line.split_whitespace() {
            let token = token.trim_end_matches([':', '}']);
            if !token.starts_with(&prefix) {
                continue;
            }
            if let Some(component) = Component::unflatten(token, component_type)
                && !declared.contains(&component)
            {
                declared.push(component);
            }
        }
    }
    declared
}

/// Catalog held in memory
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub(crate) struct MemoryCatalog {
    components: std::collections::HashSet<Component>,
}

#[cfg(test)]
impl FromIterator<Component> for MemoryCatalog {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        Self {
            components: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ComponentCatalog for MemoryCatalog {
    async fn contains(&self, component: &Component) -> bool {
        self.components.contains(component)
    }

    async fn components(&self, package_name: &str) -> Result<Vec<Component>, ControlError> {
        let mut components: Vec<Component> = self
            .components
            .iter()
            .filter(|component| component.package_name == package_name)
            .cloned()
            .collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(components)
    }
}
