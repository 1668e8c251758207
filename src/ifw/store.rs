use std::sync::Arc;

use super::{document::IfwRuleDocument, fs::IfwFileSystem, lock::PackageLocks};
use crate::{error::ControlError, model::Component};

const LOST_CONTENT_PREVIEW: usize = 256;

/// Document loaded for modification
struct Loaded {
    document: IfwRuleDocument,
    /// An unreadable file was replaced by an empty document
    discarded: bool,
}

/// Keeps one IFW rule file per package in sync with its blocked components
///
/// A package's file exists if and only if at least one of its components is
/// blocked. Read-modify-write cycles on one package are serialized; different
/// packages proceed independently.
pub struct IfwRuleStore {
    fs: Arc<dyn IfwFileSystem>,
    locks: PackageLocks,
}

impl IfwRuleStore {
    pub fn new(fs: Arc<dyn IfwFileSystem>) -> Self {
        Self {
            fs,
            locks: PackageLocks::new(),
        }
    }

    pub async fn block(&self, component: &Component) -> Result<(), ControlError> {
        self.block_all(&component.package_name, std::slice::from_ref(component))
            .await
            .map(|_| ())
    }

    pub async fn unblock(&self, component: &Component) -> Result<(), ControlError> {
        self.unblock_all(&component.package_name, std::slice::from_ref(component))
            .await
            .map(|_| ())
    }

    /// Block every component of `package_name` in one write
    ///
    /// Returns how many components were newly blocked. Components that are
    /// already blocked are left as they are.
    pub async fn block_all(
        &self,
        package_name: &str,
        components: &[Component],
    ) -> Result<usize, ControlError> {
        self.modify(package_name, components, true).await
    }

    /// Unblock every component of `package_name` in one write
    ///
    /// Returns how many components were actually unblocked. Deletes the rule
    /// file when nothing stays blocked.
    pub async fn unblock_all(
        &self,
        package_name: &str,
        components: &[Component],
    ) -> Result<usize, ControlError> {
        self.modify(package_name, components, false).await
    }

    pub async fn is_blocked(&self, component: &Component) -> Result<bool, ControlError> {
        let loaded = self.load(&component.package_name).await?;
        Ok(loaded.document.contains(component))
    }

    pub async fn blocked_components(
        &self,
        package_name: &str,
    ) -> Result<Vec<Component>, ControlError> {
        Ok(self.load(package_name).await?.document.components())
    }

    /// Remove every IFW rule of a package
    pub async fn clear(&self, package_name: &str) -> Result<(), ControlError> {
        let _guard = self.locks.acquire(package_name).await;
        log::info!("Clearing IFW rules of {package_name}");
        self.fs.delete(package_name).await
    }

    /// Remove the rule files of every package in the IFW directory
    ///
    /// Returns the packages that were cleared.
    pub async fn clear_all(&self) -> Result<Vec<String>, ControlError> {
        let packages = self.fs.list().await?;
        log::info!("Clearing IFW rules of {} packages", packages.len());
        for package_name in &packages {
            self.clear(package_name).await?;
        }
        Ok(packages)
    }

    async fn modify(
        &self,
        package_name: &str,
        components: &[Component],
        block: bool,
    ) -> Result<usize, ControlError> {
        if let Some(foreign) = components
            .iter()
            .find(|component| component.package_name != package_name)
        {
            return Err(ControlError::OperationFailed {
                component: foreign.flatten(),
                reason: format!("does not belong to package {package_name}"),
            });
        }

        let _guard = self.locks.acquire(package_name).await;
        let Loaded {
            mut document,
            discarded,
        } = self.load(package_name).await?;

        let mut changed = 0;
        for component in components {
            let updated = if block {
                document.insert(component)
            } else {
                document.remove(component)
            };
            if updated {
                log::info!(
                    "IFW {} {component}",
                    if block { "block" } else { "unblock" }
                );
                changed += 1;
            }
        }

        if changed > 0 || discarded {
            self.save(&document).await?;
        }
        Ok(changed)
    }

    async fn load(&self, package_name: &str) -> Result<Loaded, ControlError> {
        let Some(content) = self.fs.read(package_name).await? else {
            return Ok(Loaded {
                document: IfwRuleDocument::new(package_name),
                discarded: false,
            });
        };

        match IfwRuleDocument::from_xml(package_name, &content) {
            Ok(document) => Ok(Loaded {
                document,
                discarded: false,
            }),
            Err(err) => {
                let preview: String = content.chars().take(LOST_CONTENT_PREVIEW).collect();
                log::warn!(
                    "Discarding unreadable IFW rules of {package_name} ({} bytes): {err}; lost content starts with: {preview:?}",
                    content.len()
                );
                Ok(Loaded {
                    document: IfwRuleDocument::new(package_name),
                    discarded: true,
                })
            }
        }
    }

    async fn save(&self, document: &IfwRuleDocument) -> Result<(), ControlError> {
        let package_name = document.package_name();
        if document.is_empty() {
            log::debug!("No IFW rules left for {package_name}, deleting rule file");
            return self.fs.delete(package_name).await;
        }
        // Serialize before touching storage so a failure leaves the old file intact
        let content = document.to_xml()?;
        self.fs.write(package_name, &content).await?;
        log::debug!(
            "Saved {} IFW rules for {package_name}",
            document.len()
        );
        Ok(())
    }
}
