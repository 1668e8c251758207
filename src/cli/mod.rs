pub mod args;
pub mod config;
pub mod loader;
pub mod run;

pub use args::Args;
pub use config::{BackendKind, ConfigFile};
pub use loader::{Device, SettingsLoader};
pub use run::execute;
