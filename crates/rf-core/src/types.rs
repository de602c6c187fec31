//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FleetError;

/// Unique identifier for a radio device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a new device ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Signal-generation mode. At most one is active on a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Nothing generated, TX off
    #[default]
    None,
    /// White noise
    Wn,
    Fsk,
    Bpsk,
    Qpsk,
    /// Analog video; requires a fixed sample rate
    Ntsc,
}

impl Mode {
    /// Modes that own a discrete line, in line-drive order
    pub const ACTIVE: [Mode; 5] = [Mode::Wn, Mode::Fsk, Mode::Bpsk, Mode::Qpsk, Mode::Ntsc];

    /// Sample rate forced when entering NTSC
    pub const NTSC_SAMPLING_FREQ: i64 = 20_000_000;

    /// Whether this mode keys the transmitter
    pub fn is_transmitting(self) -> bool {
        self != Mode::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::Wn => "wn",
            Mode::Fsk => "fsk",
            Mode::Bpsk => "bpsk",
            Mode::Qpsk => "qpsk",
            Mode::Ntsc => "ntsc",
        }
    }

    /// Per-mode boolean view with at most one flag set
    pub fn flags(self) -> ModeFlags {
        ModeFlags {
            wn: self == Mode::Wn,
            fsk: self == Mode::Fsk,
            bpsk: self == Mode::Bpsk,
            qpsk: self == Mode::Qpsk,
            ntsc: self == Mode::Ntsc,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Mode::None),
            "wn" => Ok(Mode::Wn),
            "fsk" => Ok(Mode::Fsk),
            "bpsk" => Ok(Mode::Bpsk),
            "qpsk" => Ok(Mode::Qpsk),
            "ntsc" => Ok(Mode::Ntsc),
            other => Err(FleetError::InvalidMode(other.to_string())),
        }
    }
}

/// Boolean mode vector as exposed to clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeFlags {
    pub wn: bool,
    pub fsk: bool,
    pub bpsk: bool,
    pub qpsk: bool,
    pub ntsc: bool,
}

impl ModeFlags {
    /// Number of flags set
    pub fn active_count(&self) -> usize {
        [self.wn, self.fsk, self.bpsk, self.qpsk, self.ntsc]
            .iter()
            .filter(|on| **on)
            .count()
    }
}

/// Receiver gain control mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GainMode {
    #[default]
    Manual,
    Auto,
}

/// Result of interpreting a gain-control-mode readback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedGainMode {
    Supported(GainMode),
    /// An auto-tracking mode the fleet does not run with
    Unsupported,
}

impl GainMode {
    /// Attribute value written to the device
    pub fn as_attribute(self) -> &'static str {
        match self {
            GainMode::Manual => "manual",
            GainMode::Auto => "slow_attack",
        }
    }

    /// Interpret a raw attribute readback
    pub fn from_attribute(raw: &str) -> Result<ReportedGainMode, FleetError> {
        match raw.trim() {
            "manual" => Ok(ReportedGainMode::Supported(GainMode::Manual)),
            "slow_attack" => Ok(ReportedGainMode::Supported(GainMode::Auto)),
            "fast_attack" | "hybrid" => Ok(ReportedGainMode::Unsupported),
            other => Err(FleetError::InvalidValue(format!(
                "unrecognized gain control mode '{}'",
                other
            ))),
        }
    }
}

impl FromStr for GainMode {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(GainMode::Manual),
            "auto" | "slow_attack" => Ok(GainMode::Auto),
            other => Err(FleetError::InvalidValue(format!(
                "unsupported gain mode '{}'",
                other
            ))),
        }
    }
}

/// Parse an integer read back from a device attribute.
///
/// Accepts trailing units and fractional parts as printed by sysfs
/// attributes (`"71.000000 dB"` parses as 71). Use [`parse_exact_integer`]
/// for caller input.
pub fn parse_integer(raw: &str) -> Result<i64, FleetError> {
    let token = raw.split_whitespace().next().unwrap_or("");
    if let Ok(value) = token.parse::<i64>() {
        return Ok(value);
    }
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && v.abs() < i64::MAX as f64)
        .map(|v| v.round() as i64)
        .ok_or_else(|| FleetError::InvalidValue(format!("'{}' is not a number", raw.trim())))
}

/// Parse a caller supplied integer: optional sign and digits only
pub fn parse_exact_integer(raw: &str) -> Result<i64, FleetError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| FleetError::InvalidValue(format!("'{}' is not an integer", raw.trim())))
}
