//! Core error types for rf-fleet

use std::path::PathBuf;
use thiserror::Error;

use crate::types::DeviceId;

/// Errors surfaced by fleet operations
///
/// Every variant carries only owned strings so a single handshake result can
/// be cloned out to all of its waiters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FleetError {
    /// Device id not present in the configured fleet
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// Session handshake failed, timed out, or credentials were rejected
    #[error("Connect to {device} failed: {reason}")]
    ConnectFailure { device: DeviceId, reason: String },

    /// Remote command exited non-zero or the transport broke mid-command
    #[error("Command `{command}` failed on {device}: {reason}")]
    CommandFailure {
        device: DeviceId,
        command: String,
        exit_code: Option<u32>,
        reason: String,
    },

    /// Write attempted before the device finished baseline initialization
    #[error("Device {0} is not initialized")]
    NotInitialized(DeviceId),

    /// Unrecognized generation mode
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// Non-numeric or out-of-range value, from a caller or a device readback
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Power-port command failed or the device has no port to cycle
    #[error("Power cycle failed: {0}")]
    PowerCycleFailure(String),
}

impl FleetError {
    /// Whether the command executor should try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::ConnectFailure { .. } | FleetError::CommandFailure { .. }
        )
    }
}

/// Transport-level failures reported by shell implementations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// Could not establish or authenticate the session
    #[error("Connect error: {0}")]
    Connect(String),

    /// Session or channel broke while running a command
    #[error("Transport error: {0}")]
    Transport(String),

    /// The operation did not complete in time
    #[error("Timed out")]
    Timeout,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
