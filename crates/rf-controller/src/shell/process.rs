//! Host command execution

use async_trait::async_trait;
use tokio::process::Command;

use rf_core::traits::{CommandOutput, HostShell};
use rf_core::ShellError;

/// Runs host commands through `sh -c`
#[derive(Debug, Clone, Default)]
pub struct ProcessShell;

impl ProcessShell {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HostShell for ProcessShell {
    async fn run(&self, command: &str) -> Result<CommandOutput, ShellError> {
        tracing::debug!("host: {}", command);

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ShellError::Transport(format!("failed to spawn `{}`: {}", command, e)))?;

        // Killed by a signal: no exit code.
        let exit_code = output
            .status
            .code()
            .and_then(|code| u32::try_from(code).ok())
            .unwrap_or(1);

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
