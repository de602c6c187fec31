//! Command execution with retry
//!
//! Every device operation goes through [`CommandExecutor::run`]. A failed
//! attempt discards the session it ran on, so the next attempt starts with a
//! fresh handshake, and waits `attempt * base_delay` before trying again.

use std::sync::Arc;
use std::time::Duration;

use rf_core::config::RetryConfig;
use rf_core::{DeviceId, FleetError};

use crate::session::SessionPool;

/// Runs commands on devices through the session pool
pub struct CommandExecutor {
    pool: Arc<SessionPool>,
    max_attempts: u32,
    base_delay: Duration,
}

impl CommandExecutor {
    pub fn new(pool: Arc<SessionPool>, retry: &RetryConfig) -> Self {
        Self {
            pool,
            max_attempts: retry.max_attempts.max(1),
            base_delay: retry.base_delay,
        }
    }

    /// Run `command` with the configured attempt limit, returning trimmed
    /// stdout
    pub async fn run(&self, id: &DeviceId, command: &str) -> Result<String, FleetError> {
        self.run_with_attempts(id, command, self.max_attempts).await
    }

    /// Run `command`, trying at most `max_attempts` times.
    ///
    /// Surfaces the last error once attempts are exhausted. Errors that are
    /// not connect or command failures are returned immediately.
    pub async fn run_with_attempts(
        &self,
        id: &DeviceId,
        command: &str,
        max_attempts: u32,
    ) -> Result<String, FleetError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(id, command).await {
                Ok(output) => return Ok(output),
                Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                    if attempt > 1 {
                        tracing::warn!(
                            "Giving up on `{}` for {} after {} attempts: {}",
                            command,
                            id,
                            attempt,
                            e
                        );
                    }
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.base_delay * attempt;
                    tracing::warn!(
                        "Attempt {}/{} of `{}` on {} failed: {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        command,
                        id,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, id: &DeviceId, command: &str) -> Result<String, FleetError> {
        let pooled = self.pool.acquire(id).await?;
        tracing::debug!("{}: {}", id, command);

        let reason = match pooled.execute(command).await {
            Ok(output) if output.success() => return Ok(output.stdout.trim().to_string()),
            Ok(output) => (Some(output.exit_code), output.failure_reason()),
            Err(e) => (None, e.to_string()),
        };

        self.pool.invalidate(id, pooled.generation).await;

        Err(FleetError::CommandFailure {
            device: id.clone(),
            command: command.to_string(),
            exit_code: reason.0,
            reason: reason.1,
        })
    }
}
