//! rf-core: Core abstractions and configuration for rf-fleet
//!
//! This crate provides the shared device types, error kinds, configuration
//! structures and shell traits used by the controller and its test harness.

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ConfigError, FleetError, ShellError};
pub use types::{DeviceId, GainMode, Mode, ModeFlags};
