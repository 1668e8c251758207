use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{
    apply::DEFAULT_MAX_CONCURRENT_PACKAGES,
    error::BlockerError,
    ifw::DEFAULT_IFW_DIR,
    shell::{companion::DEFAULT_SOCKET_PATH, retry, root},
};

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub ifw: IfwConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// `su -c` for every command
    #[default]
    Root,
    /// Privileged companion daemon on a Unix socket
    Companion,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// su binary used by the root backend
    pub su_path: PathBuf,
    /// Socket of the companion daemon
    pub socket: PathBuf,
    /// Per-command timeout in milliseconds
    pub timeout_ms: u64,
    /// Attempts per command while the backend is unavailable
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Packages a batch works on at the same time
    pub max_concurrency: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Root,
            su_path: PathBuf::from(root::DEFAULT_SU_PATH),
            socket: PathBuf::from(DEFAULT_SOCKET_PATH),
            timeout_ms: root::DEFAULT_TIMEOUT.as_millis() as u64,
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: retry::DEFAULT_RETRY_DELAY.as_millis() as u64,
            max_concurrency: DEFAULT_MAX_CONCURRENT_PACKAGES,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct IfwConfig {
    pub dir: PathBuf,
    /// Access rule files directly instead of through the privileged backend
    pub local: bool,
}

impl Default for IfwConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_IFW_DIR),
            local: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub user_id: u32,
    /// Check that targets exist on the device before changing them
    pub verify_components: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            user_id: 0,
            verify_components: true,
        }
    }
}

impl ConfigFile {
    /// Load configuration file
    pub fn load(path: &Path) -> Result<Self, BlockerError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| BlockerError::ConfigParse {
            path: PathBuf::from(path),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_full_config() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"
[backend]
kind = "companion"
socket = "/dev/socket/custom"
timeout_ms = 500
max_attempts = 5
max_concurrency = 2

[ifw]
dir = "/tmp/ifw"
local = true

[device]
user_id = 10
verify_components = false
"#
        )
        .unwrap();

        let config = ConfigFile::load(tmp.path()).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Companion);
        assert_eq!(config.backend.socket, PathBuf::from("/dev/socket/custom"));
        assert_eq!(config.backend.timeout(), Duration::from_millis(500));
        assert_eq!(config.backend.max_attempts, 5);
        assert_eq!(config.backend.max_concurrency, 2);
        assert!(!config.device.verify_components);
        assert_eq!(config.ifw.dir, PathBuf::from("/tmp/ifw"));
        assert!(config.ifw.local);
        assert_eq!(config.device.user_id, 10);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[backend]\nkind = \"root\"\n").unwrap();

        let config = ConfigFile::load(tmp.path()).unwrap();
        assert_eq!(config.backend.su_path, PathBuf::from("su"));
        assert_eq!(config.backend.max_attempts, retry::DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.ifw.dir, PathBuf::from(DEFAULT_IFW_DIR));
        assert!(!config.ifw.local);
        assert_eq!(config.device.user_id, 0);
        assert!(config.device.verify_components);
        assert_eq!(config.backend.max_concurrency, DEFAULT_MAX_CONCURRENT_PACKAGES);
    }

    #[test]
    fn invalid_backend_is_a_parse_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[backend]\nkind = \"shizuku\"\n").unwrap();

        let err = ConfigFile::load(tmp.path()).unwrap_err();
        assert!(matches!(err, BlockerError::ConfigParse { .. }));
    }
}
