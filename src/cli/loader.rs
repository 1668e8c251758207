use std::sync::Arc;

use crate::{
    apply::{BatchRuleApplier, ComponentCatalog, DeviceCatalog},
    controller::ComponentController,
    error::BlockerError,
    ifw::{IfwFileSystem, IfwRuleStore, LocalFileSystem, ShellFileSystem},
    shell::{CompanionShell, PrivilegedShell, RetryingShell, RootShell},
};

use super::args::Args;
use super::config::{BackendKind, ConfigFile};

/// Load the config file and apply command line overrides on top of it
pub struct SettingsLoader;

impl SettingsLoader {
    pub fn load(args: &Args) -> Result<ConfigFile, BlockerError> {
        let mut config = match args.config.as_ref() {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        if let Some(kind) = args.backend {
            config.backend.kind = kind;
        }
        if let Some(dir) = args.ifw_dir.as_ref() {
            config.ifw.dir = dir.clone();
        }
        if let Some(user_id) = args.user {
            config.device.user_id = user_id;
        }
        if args.no_verify {
            config.device.verify_components = false;
        }

        Ok(config)
    }

    /// Privileged shell for the configured backend, retried while unavailable
    pub fn shell(config: &ConfigFile) -> Arc<dyn PrivilegedShell> {
        let backend = &config.backend;
        match backend.kind {
            BackendKind::Root => {
                log::debug!("Using root backend via {}", backend.su_path.display());
                Arc::new(RetryingShell::new(
                    RootShell::new(&backend.su_path, backend.timeout()),
                    backend.max_attempts,
                    backend.retry_delay(),
                ))
            }
            BackendKind::Companion => {
                log::debug!("Using companion backend at {}", backend.socket.display());
                Arc::new(RetryingShell::new(
                    CompanionShell::new(&backend.socket, backend.timeout()),
                    backend.max_attempts,
                    backend.retry_delay(),
                ))
            }
        }
    }

    /// Controller, catalog and applier sharing one privileged shell
    pub fn device(config: &ConfigFile) -> Device {
        let shell = Self::shell(config);
        let fs: Arc<dyn IfwFileSystem> = if config.ifw.local {
            Arc::new(LocalFileSystem::new(&config.ifw.dir))
        } else {
            Arc::new(ShellFileSystem::new(Arc::clone(&shell), &config.ifw.dir))
        };
        let catalog: Option<Arc<dyn ComponentCatalog>> = config
            .device
            .verify_components
            .then(|| Arc::new(DeviceCatalog::new(Arc::clone(&shell))) as Arc<dyn ComponentCatalog>);
        let controller = Arc::new(ComponentController::new(
            shell,
            IfwRuleStore::new(fs),
            config.device.user_id,
        ));
        Device {
            controller,
            catalog,
            max_concurrency: config.backend.max_concurrency,
        }
    }
}

pub struct Device {
    pub controller: Arc<ComponentController>,
    /// Present when targets must be checked before they are changed
    pub catalog: Option<Arc<dyn ComponentCatalog>>,
    max_concurrency: usize,
}

impl Device {
    pub fn applier(&self) -> BatchRuleApplier {
        let applier = BatchRuleApplier::new(Arc::clone(&self.controller))
            .with_concurrency(self.max_concurrency);
        match &self.catalog {
            Some(catalog) => applier.with_catalog(Arc::clone(catalog)),
            None => applier,
        }
    }
}
