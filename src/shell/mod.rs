pub mod companion;
pub mod retry;
pub mod root;

use std::borrow::Cow;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::error::ControlError;

pub use companion::CompanionShell;
pub use retry::RetryingShell;
pub use root::RootShell;

/// Result of one command run through a privileged channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, for matching error messages printed on either stream
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Channel able to run shell commands with elevated privilege
///
/// Implementations return `Ok` for every command that ran to completion, whatever its
/// exit code. `Err` is reserved for the channel itself failing: no privilege granted,
/// transport errors and timeouts.
///
/// No ordering is guaranteed between concurrent calls on the same instance.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PrivilegedShell: Send + Sync + 'static {
    async fn run_command(&self, command: &str) -> Result<CommandOutput, ControlError>;

    /// Run `command` with `input` fed to its standard input
    ///
    /// Payloads travel outside the command line, so their size is not bound by
    /// the kernel's argument length limit.
    async fn run_command_with_input(
        &self,
        command: &str,
        input: &str,
    ) -> Result<CommandOutput, ControlError>;
}

/// Quote a single argument for interpolation into a POSIX shell command
pub fn quote(arg: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(arg)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_leaves_plain_names_alone() {
        assert_eq!(quote("com.example/com.example.Main"), "com.example/com.example.Main");
    }

    #[test]
    fn quote_protects_inner_class_dollar() {
        let quoted = quote("com.example/com.example.Outer$Inner");
        assert_eq!(quoted, "'com.example/com.example.Outer$Inner'");
    }

    #[test]
    fn quote_escapes_single_quotes() {
        let quoted = quote("it's");
        assert!(!quoted.contains("it's"));
        assert!(quoted.starts_with('\''));
    }

    #[test]
    fn combined_includes_stderr_only_when_present() {
        let output = CommandOutput {
            stdout: "out".to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert_eq!(output.combined(), "out");

        let output = CommandOutput {
            stderr: "err".to_string(),
            ..output
        };
        assert_eq!(output.combined(), "out\nerr");
    }
}
