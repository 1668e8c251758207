use std::{collections::HashSet, sync::Arc};

use crate::{
    error::ControlError,
    model::Component,
    shell::{CommandOutput, PrivilegedShell, quote},
};

const NOT_FOUND_MARKERS: &[&str] = &[
    "Unknown component",
    "does not exist",
    "Unknown package",
    "Unable to find package",
];
const PERMISSION_MARKERS: &[&str] = &[
    "SecurityException",
    "Permission Denial",
    "Shell cannot change component state",
];

/// `pm enable` / `pm disable` through the privileged shell
pub struct PackageManagerControl {
    shell: Arc<dyn PrivilegedShell>,
    user_id: u32,
}

impl PackageManagerControl {
    pub fn new(shell: Arc<dyn PrivilegedShell>, user_id: u32) -> Self {
        Self { shell, user_id }
    }

    /// Set the enabled state and confirm it by querying it back
    pub async fn switch(&self, component: &Component, enabled: bool) -> Result<(), ControlError> {
        let verb = if enabled { "enable" } else { "disable" };
        let command = format!(
            "pm {verb} --user {} {}",
            self.user_id,
            quote(&component.flatten())
        );
        log::debug!("{command}");

        let output = self.shell.run_command(&command).await?;
        // Some pm versions print the error and still exit with 0
        if let Some(err) = classify_failure(component, &output) {
            return Err(err);
        }
        if !output.success() {
            return Err(ControlError::OperationFailed {
                component: component.flatten(),
                reason: format!(
                    "pm {verb} exited with {}: {}",
                    output.exit_code,
                    output.combined().trim()
                ),
            });
        }

        let actual = self.is_enabled(component).await?;
        if actual != enabled {
            return Err(ControlError::OperationFailed {
                component: component.flatten(),
                reason: format!("state still {} after pm {verb}", state_name(actual)),
            });
        }

        log::info!("PM {verb} {component}");
        Ok(())
    }

    /// Effective state as recorded by the package manager for the configured user
    pub async fn is_enabled(&self, component: &Component) -> Result<bool, ControlError> {
        let disabled = self.disabled_components(&component.package_name).await?;
        Ok(!disabled.contains(&component.name))
    }

    /// Class names the package manager reports as disabled for this package
    pub async fn disabled_components(
        &self,
        package_name: &str,
    ) -> Result<HashSet<String>, ControlError> {
        let output = self
            .shell
            .run_command(&format!("dumpsys package {}", quote(package_name)))
            .await?;
        if output
            .combined()
            .contains(&format!("Unable to find package: {package_name}"))
        {
            return Err(ControlError::ComponentNotFound {
                component: package_name.to_string(),
            });
        }
        if !output.success() {
            return Err(ControlError::OperationFailed {
                component: package_name.to_string(),
                reason: format!(
                    "dumpsys package exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }
        Ok(parse_disabled_components(&output.stdout, self.user_id))
    }
}

fn state_name(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}

fn classify_failure(component: &Component, output: &CommandOutput) -> Option<ControlError> {
    let text = output.combined();
    if NOT_FOUND_MARKERS.iter().any(|marker| text.contains(marker)) {
        return Some(ControlError::ComponentNotFound {
            component: component.flatten(),
        });
    }
    if PERMISSION_MARKERS.iter().any(|marker| text.contains(marker)) {
        return Some(ControlError::PermissionDenied {
            reason: text.trim().to_string(),
        });
    }
    None
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Extract the `disabledComponents:` list from `dumpsys package` output
///
/// Newer releases list overrides per user under `User <id>:`; older ones list
/// them once per package. The per-user list wins when a `User` block exists.
pub(crate) fn parse_disabled_components(dumpsys: &str, user_id: u32) -> HashSet<String> {
    let user_header = format!("User {user_id}:");
    let has_user_blocks = dumpsys
        .lines()
        .any(|line| line.trim_start().starts_with("User "));

    let mut disabled = HashSet::new();
    let mut user_indent: Option<usize> = None;
    let mut list_indent: Option<usize> = None;

    for line in dumpsys.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = indent_of(line);
        let trimmed = line.trim();

        if let Some(list) = list_indent {
            if indent > list {
                disabled.insert(trimmed.to_string());
                continue;
            }
            list_indent = None;
        }

        if has_user_blocks {
            if trimmed.starts_with("User ") {
                user_indent = trimmed.starts_with(&user_header).then_some(indent);
                continue;
            }
            match user_indent {
                Some(user) if indent > user => {}
                Some(_) => {
                    user_indent = None;
                    continue;
                }
                None => continue,
            }
        }

        if trimmed == "disabledComponents:" {
            list_indent = Some(indent);
        }
    }

    disabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::ComponentType, shell::MockPrivilegedShell};
    use std::sync::Mutex;

    const MULTI_USER_DUMP: &str = "\
Packages:
  Package [com.example] (1a2b3c):
    userId=10123
    versionName=1.0
    User 0: ceDataInode=1234 installed=true hidden=false suspended=false
      gids=[3003]
      disabledComponents:
        com.example.BootReceiver
        com.example.Outer$Inner
      enabledComponents:
        com.example.MainActivity
    User 10: ceDataInode=0 installed=true hidden=false suspended=false
      disabledComponents:
        com.example.SyncService
";

    const LEGACY_DUMP: &str = "\
Packages:
  Package [com.example] (1a2b3c):
    userId=10123
    disabledComponents:
      com.example.BootReceiver
    grantedPermissions:
      android.permission.INTERNET
";

    #[test]
    fn parses_components_of_selected_user() {
        let user0 = parse_disabled_components(MULTI_USER_DUMP, 0);
        assert_eq!(user0.len(), 2);
        assert!(user0.contains("com.example.BootReceiver"));
        assert!(user0.contains("com.example.Outer$Inner"));

        let user10 = parse_disabled_components(MULTI_USER_DUMP, 10);
        assert_eq!(user10.len(), 1);
        assert!(user10.contains("com.example.SyncService"));

        assert!(parse_disabled_components(MULTI_USER_DUMP, 11).is_empty());
    }

    #[test]
    fn parses_legacy_package_level_list() {
        let disabled = parse_disabled_components(LEGACY_DUMP, 0);
        assert_eq!(disabled.len(), 1);
        assert!(disabled.contains("com.example.BootReceiver"));
    }

    fn component() -> Component {
        Component::new(
            "com.example",
            "com.example.BootReceiver",
            ComponentType::Receiver,
        )
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    /// Shell simulating pm/dumpsys for a single component
    fn fake_pm(initially_enabled: bool, honour_writes: bool) -> MockPrivilegedShell {
        let enabled = Arc::new(Mutex::new(initially_enabled));
        let mut shell = MockPrivilegedShell::new();
        shell.expect_run_command().returning(move |cmd| {
            let mut state = enabled.lock().unwrap();
            if cmd.starts_with("pm enable") {
                if honour_writes {
                    *state = true;
                }
                Ok(ok("Component {com.example/com.example.BootReceiver} new state: enabled"))
            } else if cmd.starts_with("pm disable") {
                if honour_writes {
                    *state = false;
                }
                Ok(ok("Component {com.example/com.example.BootReceiver} new state: disabled"))
            } else if cmd.starts_with("dumpsys package") {
                let list = if *state {
                    ""
                } else {
                    "      disabledComponents:\n        com.example.BootReceiver\n"
                };
                Ok(ok(&format!("    User 0: installed=true\n{list}")))
            } else {
                panic!("unexpected command {cmd}");
            }
        });
        shell
    }

    #[tokio::test]
    async fn disable_is_confirmed_by_query() {
        let pm = PackageManagerControl::new(Arc::new(fake_pm(true, true)), 0);
        pm.switch(&component(), false).await.unwrap();
        assert!(!pm.is_enabled(&component()).await.unwrap());
    }

    #[tokio::test]
    async fn disabling_twice_is_not_an_error() {
        let pm = PackageManagerControl::new(Arc::new(fake_pm(true, true)), 0);
        pm.switch(&component(), false).await.unwrap();
        pm.switch(&component(), false).await.unwrap();
    }

    #[tokio::test]
    async fn unchanged_state_is_operation_failed() {
        let pm = PackageManagerControl::new(Arc::new(fake_pm(true, false)), 0);
        let err = pm.switch(&component(), false).await.unwrap_err();
        assert!(matches!(err, ControlError::OperationFailed { .. }));
    }

    #[tokio::test]
    async fn command_uses_user_and_quotes_name() {
        let mut shell = MockPrivilegedShell::new();
        shell
            .expect_run_command()
            .withf(|cmd: &str| cmd == "pm disable --user 10 'com.example/com.example.Outer$Inner'")
            .times(1)
            .returning(|_| {
                Ok(CommandOutput {
                    stderr: "Error: Unknown component: com.example/com.example.Outer$Inner"
                        .to_string(),
                    exit_code: 255,
                    ..Default::default()
                })
            });

        let pm = PackageManagerControl::new(Arc::new(shell), 10);
        let inner = Component::new(
            "com.example",
            "com.example.Outer$Inner",
            ComponentType::Receiver,
        );
        let err = pm.switch(&inner, false).await.unwrap_err();
        assert!(matches!(err, ControlError::ComponentNotFound { .. }));
    }

    #[tokio::test]
    async fn security_exception_is_permission_denied() {
        let mut shell = MockPrivilegedShell::new();
        shell.expect_run_command().times(1).returning(|_| {
            Ok(CommandOutput {
                stdout: "Exception occurred while executing 'disable':\njava.lang.SecurityException: Shell cannot change component state for com.example/com.example.BootReceiver to 2".to_string(),
                exit_code: 255,
                ..Default::default()
            })
        });

        let pm = PackageManagerControl::new(Arc::new(shell), 0);
        let err = pm.switch(&component(), false).await.unwrap_err();
        assert!(matches!(err, ControlError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn unknown_package_query_is_not_found() {
        let mut shell = MockPrivilegedShell::new();
        shell
            .expect_run_command()
            .returning(|_| Ok(ok("Unable to find package: com.example\n")));

        let pm = PackageManagerControl::new(Arc::new(shell), 0);
        let err = pm.is_enabled(&component()).await.unwrap_err();
        assert!(matches!(err, ControlError::ComponentNotFound { .. }));
    }
}
