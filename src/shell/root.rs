use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command};

use super::{CommandOutput, PrivilegedShell};
use crate::error::ControlError;

pub const DEFAULT_SU_PATH: &str = "su";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs every command through `su -c`
pub struct RootShell {
    su_path: PathBuf,
    timeout: Duration,
}

impl RootShell {
    pub fn new<P: AsRef<Path>>(su_path: P, timeout: Duration) -> Self {
        Self {
            su_path: su_path.as_ref().to_path_buf(),
            timeout,
        }
    }
}

impl Default for RootShell {
    fn default() -> Self {
        Self::new(DEFAULT_SU_PATH, DEFAULT_TIMEOUT)
    }
}

impl RootShell {
    async fn run(&self, command: &str, input: Option<&str>) -> Result<CommandOutput, ControlError> {
        log::debug!("su -c {command}");

        let mut child = Command::new(&self.su_path)
            .arg("-c")
            .arg(command)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| spawn_error(&self.su_path, source))?;

        // Feed stdin concurrently with draining stdout so neither pipe can fill up
        let feeder = match (child.stdin.take(), input) {
            (Some(mut stdin), Some(input)) => {
                let input = input.as_bytes().to_vec();
                Some(tokio::spawn(async move {
                    stdin.write_all(&input).await?;
                    stdin.shutdown().await
                }))
            }
            _ => None,
        };

        // Dropping the pending future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ControlError::BackendUnavailable {
                reason: format!("failed to wait for su: {source}"),
            })?,
            Err(_) => {
                return Err(ControlError::BackendUnavailable {
                    reason: format!("command timed out after {:?}: {command}", self.timeout),
                });
            }
        };

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                Ok(Err(source)) => log::debug!("stdin of su closed early: {source}"),
                Err(err) => log::debug!("stdin writer of su aborted: {err}"),
            }
        }

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        if su_refused(&output) {
            return Err(ControlError::PermissionDenied {
                reason: output.stderr.trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl PrivilegedShell for RootShell {
    async fn run_command(&self, command: &str) -> Result<CommandOutput, ControlError> {
        self.run(command, None).await
    }

    async fn run_command_with_input(
        &self,
        command: &str,
        input: &str,
    ) -> Result<CommandOutput, ControlError> {
        self.run(command, Some(input)).await
    }
}

fn spawn_error(su_path: &Path, source: io::Error) -> ControlError {
    match source.kind() {
        io::ErrorKind::PermissionDenied => ControlError::PermissionDenied {
            reason: format!("cannot execute {}: {source}", su_path.display()),
        },
        _ => ControlError::BackendUnavailable {
            reason: format!("cannot execute {}: {source}", su_path.display()),
        },
    }
}

/// su itself rejected the request (root not granted to this process)
fn su_refused(output: &CommandOutput) -> bool {
    if output.success() || !output.stdout.trim().is_empty() {
        return false;
    }
    let stderr = output.stderr.trim().to_ascii_lowercase();
    stderr == "permission denied"
        || (stderr.starts_with("su:") && (stderr.contains("denied") || stderr.contains("not allowed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn failed(stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: 1,
        }
    }

    #[rstest]
    #[case("Permission denied")]
    #[case("su: permission denied")]
    #[case("su: uid 10123 not allowed to su")]
    fn detects_su_refusal(#[case] stderr: &str) {
        assert!(su_refused(&failed("", stderr)));
    }

    #[rstest]
    #[case("", "Error: Unknown component")]
    #[case("some output", "Permission denied")]
    fn ignores_command_failures(#[case] stdout: &str, #[case] stderr: &str) {
        assert!(!su_refused(&failed(stdout, stderr)));
    }

    #[tokio::test]
    async fn missing_su_binary_is_backend_unavailable() {
        let shell = RootShell::new("/nonexistent/bin/su", Duration::from_secs(1));
        let err = shell.run_command("id").await.unwrap_err();
        assert!(matches!(err, ControlError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn runs_command_through_wrapper() {
        // `sh -c` behaves like `su -c` for the purpose of this test
        let shell = RootShell::new("sh", Duration::from_secs(5));
        let output = shell.run_command("echo hello; exit 3").await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn input_larger_than_argument_limit_reaches_stdin() {
        let shell = RootShell::new("sh", Duration::from_secs(10));
        let input = "x".repeat(512 * 1024);
        let output = shell.run_command_with_input("wc -c", &input).await.unwrap();
        assert_eq!(output.stdout.trim(), "524288");
        assert!(output.success());
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let shell = RootShell::new("sh", Duration::from_millis(50));
        let err = shell.run_command("sleep 5").await.unwrap_err();
        assert!(matches!(err, ControlError::BackendUnavailable { .. }));
    }
}
