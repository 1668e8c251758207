use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::{
    error::ControlError,
    shell::{PrivilegedShell, quote},
};

pub const DEFAULT_IFW_DIR: &str = "/data/system/ifw";

/// Storage of the per-package IFW files
///
/// `write` must be atomic: readers see either the previous or the new content.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IfwFileSystem: Send + Sync + 'static {
    /// Content of the package's rule file, `None` if it does not exist
    async fn read(&self, package_name: &str) -> Result<Option<String>, ControlError>;
    async fn write(&self, package_name: &str, content: &str) -> Result<(), ControlError>;
    /// Delete the package's rule file; deleting a missing file succeeds
    async fn delete(&self, package_name: &str) -> Result<(), ControlError>;
    /// Packages that currently have a rule file
    async fn list(&self) -> Result<Vec<String>, ControlError>;
}

fn rule_file(dir: &Path, package_name: &str) -> PathBuf {
    dir.join(format!("{package_name}.xml"))
}

fn staging_file(dir: &Path, package_name: &str) -> PathBuf {
    dir.join(format!("{package_name}.xml.tmp"))
}

/// Rule files accessed through the privileged shell (the IFW directory is root-only)
pub struct ShellFileSystem {
    shell: Arc<dyn PrivilegedShell>,
    dir: PathBuf,
}

impl ShellFileSystem {
    pub fn new<P: AsRef<Path>>(shell: Arc<dyn PrivilegedShell>, dir: P) -> Self {
        Self {
            shell,
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn quoted(path: &Path) -> String {
        quote(&path.to_string_lossy())
    }
}

#[async_trait]
impl IfwFileSystem for ShellFileSystem {
    async fn read(&self, package_name: &str) -> Result<Option<String>, ControlError> {
        let path = Self::quoted(&rule_file(&self.dir, package_name));
        let output = self
            .shell
            .run_command(&format!("if [ -f {path} ]; then cat {path}; else exit 2; fi"))
            .await?;
        match output.exit_code {
            0 => Ok(Some(output.stdout)),
            2 => Ok(None),
            code => Err(ControlError::BackendUnavailable {
                reason: format!(
                    "reading IFW rules of {package_name} exited with {code}: {}",
                    output.stderr.trim()
                ),
            }),
        }
    }

    async fn write(&self, package_name: &str, content: &str) -> Result<(), ControlError> {
        let target = Self::quoted(&rule_file(&self.dir, package_name));
        let staging = Self::quoted(&staging_file(&self.dir, package_name));
        let dir = Self::quoted(&self.dir);
        // Content goes through stdin; rule files of large apps exceed the argument limit
        let command = format!(
            "set -e\nmkdir -p {dir}\ncat > {staging}\nchmod 0644 {staging}\nmv -f {staging} {target}"
        );

        let output = self
            .shell
            .run_command_with_input(&command, content)
            .await?;
        if !output.success() {
            return Err(ControlError::OperationFailed {
                component: package_name.to_string(),
                reason: format!(
                    "writing IFW rules exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }
        Ok(())
    }

    async fn delete(&self, package_name: &str) -> Result<(), ControlError> {
        let path = Self::quoted(&rule_file(&self.dir, package_name));
        let output = self.shell.run_command(&format!("rm -f {path}")).await?;
        if !output.success() {
            return Err(ControlError::OperationFailed {
                component: package_name.to_string(),
                reason: format!(
                    "deleting IFW rules exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, ControlError> {
        let dir = Self::quoted(&self.dir);
        let output = self
            .shell
            .run_command(&format!(
                "if [ -d {dir} ]; then cd {dir} && for f in *.xml; do [ -f \"$f\" ] && echo \"${{f%.xml}}\"; done; fi; exit 0"
            ))
            .await?;
        if !output.success() {
            return Err(ControlError::BackendUnavailable {
                reason: format!(
                    "listing IFW rules exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Rule files accessed directly, for processes that already run as root
pub struct LocalFileSystem {
    dir: PathBuf,
}

impl LocalFileSystem {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_of(&self, package_name: &str) -> PathBuf {
        rule_file(&self.dir, package_name)
    }
}

fn io_error(package_name: &str, action: &str, source: io::Error) -> ControlError {
    match source.kind() {
        io::ErrorKind::PermissionDenied => ControlError::PermissionDenied {
            reason: format!("{action} IFW rules of {package_name}: {source}"),
        },
        _ => ControlError::OperationFailed {
            component: package_name.to_string(),
            reason: format!("{action} IFW rules: {source}"),
        },
    }
}

#[async_trait]
impl IfwFileSystem for LocalFileSystem {
    async fn read(&self, package_name: &str) -> Result<Option<String>, ControlError> {
        match tokio::fs::read(rule_file(&self.dir, package_name)).await {
            // Invalid UTF-8 is left for the XML parser to reject
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(package_name, "reading", source)),
        }
    }

    async fn write(&self, package_name: &str, content: &str) -> Result<(), ControlError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| io_error(package_name, "writing", source))?;

        let staging = staging_file(&self.dir, package_name);
        tokio::fs::write(&staging, content)
            .await
            .map_err(|source| io_error(package_name, "writing", source))?;
        if let Err(source) = tokio::fs::rename(&staging, rule_file(&self.dir, package_name)).await
        {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error(package_name, "replacing", source));
        }
        Ok(())
    }

    async fn delete(&self, package_name: &str) -> Result<(), ControlError> {
        match tokio::fs::remove_file(rule_file(&self.dir, package_name)).await {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(package_name, "deleting", source)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, ControlError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error("*", "listing", source)),
        };
        let mut packages = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error("*", "listing", source))?
        {
            let file_name = entry.file_name();
            let Some(package_name) = file_name.to_str().and_then(|name| name.strip_suffix(".xml"))
            else {
                continue;
            };
            let is_file = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_file())
                .unwrap_or(false);
            if is_file {
                packages.push(package_name.to_string());
            }
        }
        packages.sort();
        Ok(packages)
    }
}
