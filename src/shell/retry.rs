use std::time::Duration;

use async_trait::async_trait;

use super::{CommandOutput, PrivilegedShell};
use crate::error::ControlError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Retries commands whose channel was unavailable
///
/// Only [`ControlError::BackendUnavailable`] is retried; a command that ran is
/// returned as is, whatever its exit code. A timeout is also `BackendUnavailable`
/// and the timed out command may already have taken effect, so only idempotent
/// commands belong behind this wrapper: `pm enable|disable` to a fixed state,
/// whole-file IFW replacement and reads.
pub struct RetryingShell<S> {
    inner: S,
    max_attempts: u32,
    delay: Duration,
}

impl<S: PrivilegedShell> RetryingShell<S> {
    pub fn new(inner: S, max_attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    async fn retry<F, Fut>(&self, command: &str, run: F) -> Result<CommandOutput, ControlError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<CommandOutput, ControlError>>,
    {
        let mut attempt = 1;
        loop {
            match run().await {
                Err(ControlError::BackendUnavailable { reason }) if attempt < self.max_attempts => {
                    log::warn!(
                        "Backend unavailable for `{command}` (attempt {attempt}/{}): {reason}",
                        self.max_attempts
                    );
                    // Linear backoff
                    tokio::time::sleep(self.delay * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl<S: PrivilegedShell> PrivilegedShell for RetryingShell<S> {
    async fn run_command(&self, command: &str) -> Result<CommandOutput, ControlError> {
        self.retry(command, || self.inner.run_command(command)).await
    }

    async fn run_command_with_input(
        &self,
        command: &str,
        input: &str,
    ) -> Result<CommandOutput, ControlError> {
        self.retry(command, || self.inner.run_command_with_input(command, input))
            .await
    }
}
