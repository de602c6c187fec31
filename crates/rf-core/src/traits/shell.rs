//! Shell traits
//!
//! Radios are driven through one-line shell commands. A [`RemoteShell`]
//! opens sessions to devices; a [`HostShell`] runs commands on the machine
//! hosting the controller, where the relays and USB hub are wired.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::DeviceDescriptor;
use crate::error::ShellError;

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: u32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Human-readable failure reason
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit status {}", self.exit_code)
        } else {
            stderr.to_string()
        }
    }
}

/// An authenticated session to one device
///
/// Implementations must accept one command at a time per session.
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Run a single command and collect its output
    async fn execute(&self, command: &str) -> Result<CommandOutput, ShellError>;

    /// Token cancelled when the session ends, whether closed locally or by
    /// the remote side
    fn closed(&self) -> CancellationToken;

    /// Close the session
    async fn close(&self);
}

/// Opens sessions to devices
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Perform the handshake and authentication for `device`
    async fn connect(&self, device: &DeviceDescriptor)
        -> Result<Arc<dyn ShellSession>, ShellError>;
}

/// Runs commands on the controller host
#[async_trait]
pub trait HostShell: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput, ShellError>;
}
