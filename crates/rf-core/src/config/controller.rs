//! Controller configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use super::{DeviceDescriptor, RELAY_COUNT};
use crate::error::ConfigError;
use crate::types::Mode;

/// Configuration for the fleet controller daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Interval between periodic state refreshes
    #[serde(with = "duration_secs")]
    pub sync_interval: Duration,

    /// Remote shell credentials and timeouts
    pub ssh: SshConfig,

    /// Command retry policy
    pub retry: RetryConfig,

    /// Device attribute paths
    pub attributes: AttributeConfig,

    /// Discrete lines selecting the generation mode on each device
    pub mode_lines: ModeLineConfig,

    /// Shared relay lines on the controller host
    pub relays: RelayConfig,

    /// USB power port control on the controller host
    pub power: PowerConfig,

    /// The fleet
    pub devices: Vec<DeviceDescriptor>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            ssh: SshConfig::default(),
            retry: RetryConfig::default(),
            attributes: AttributeConfig::default(),
            mode_lines: ModeLineConfig::default(),
            relays: RelayConfig::default(),
            power: PowerConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl ControllerConfig {
    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.as_str().trim().is_empty() {
                return Err(ConfigError::Invalid("device id must not be empty".into()));
            }
            if device.address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "device {} has no address",
                    device.id
                )));
            }
            if !seen.insert(&device.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device id {}",
                    device.id
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.sync_interval.is_zero() {
            return Err(ConfigError::Invalid("sync_interval must be non-zero".into()));
        }

        let lines: HashSet<u32> = Mode::ACTIVE
            .iter()
            .filter_map(|m| self.mode_lines.line(*m))
            .collect();
        if lines.len() != Mode::ACTIVE.len() {
            return Err(ConfigError::Invalid(
                "mode_lines must assign a distinct line to every mode".into(),
            ));
        }

        Ok(())
    }
}

/// Remote shell settings shared by every device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub username: String,
    pub password: String,
    /// Port used when a device address has none
    pub port: u16,
    /// Upper bound on a session handshake
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            password: "analog".to_string(),
            port: 22,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Command retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per command, including the first
    pub max_attempts: u32,
    /// Delay unit; attempt `n` is followed by `n * base_delay`
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// An attribute the initializer pins to a fixed value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineAttribute {
    pub path: String,
    pub value: String,
}

impl BaselineAttribute {
    pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Sysfs attribute paths on each device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeConfig {
    pub gain_mode: String,
    pub gain: String,
    pub freq: String,
    pub sampling_freq: String,
    /// Checked and written in order during initialization
    pub baseline: Vec<BaselineAttribute>,
}

const PHY: &str = "/sys/bus/iio/devices/iio:device0";
const DDS: &str = "/sys/bus/iio/devices/iio:device3";

impl Default for AttributeConfig {
    fn default() -> Self {
        Self {
            gain_mode: format!("{PHY}/in_voltage0_gain_control_mode"),
            gain: format!("{PHY}/in_voltage0_hardwaregain"),
            freq: format!("{PHY}/out_altvoltage1_TX_LO_frequency"),
            sampling_freq: format!("{PHY}/in_voltage_sampling_frequency"),
            baseline: vec![
                BaselineAttribute::new(format!("{DDS}/scan_elements/out_voltage0_en"), "1"),
                BaselineAttribute::new(format!("{DDS}/scan_elements/out_voltage1_en"), "1"),
                BaselineAttribute::new(format!("{DDS}/buffer/length"), "32768"),
                BaselineAttribute::new(format!("{DDS}/buffer/enable"), "1"),
            ],
        }
    }
}

/// Discrete line per generation mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeLineConfig {
    pub chip: String,
    pub wn: u32,
    pub fsk: u32,
    pub bpsk: u32,
    pub qpsk: u32,
    pub ntsc: u32,
}

impl Default for ModeLineConfig {
    fn default() -> Self {
        Self {
            chip: "gpiochip0".to_string(),
            wn: 1,
            fsk: 2,
            bpsk: 3,
            qpsk: 4,
            ntsc: 5,
        }
    }
}

impl ModeLineConfig {
    /// Line driving `mode`; `Mode::None` has no line
    pub fn line(&self, mode: Mode) -> Option<u32> {
        match mode {
            Mode::None => None,
            Mode::Wn => Some(self.wn),
            Mode::Fsk => Some(self.fsk),
            Mode::Bpsk => Some(self.bpsk),
            Mode::Qpsk => Some(self.qpsk),
            Mode::Ntsc => Some(self.ntsc),
        }
    }
}

/// Relay lines on the controller host; active-low
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub chip: String,
    pub lines: [u32; RELAY_COUNT],
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chip: "gpiochip0".to_string(),
            lines: [17, 27, 22],
        }
    }
}

/// USB power control; `{port}` and `{action}` are substituted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub port_command: String,
    pub fleet_command: String,
    /// Fixed wait between power off and power on
    #[serde(with = "duration_secs")]
    pub settle_delay: Duration,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            port_command: "uhubctl -l 1-1 -p {port} -a {action}".to_string(),
            fleet_command: "uhubctl -l 1-1 -a {action}".to_string(),
            settle_delay: Duration::from_secs(5),
        }
    }
}

impl PowerConfig {
    /// Command switching a single port
    pub fn port(&self, port: &str, on: bool) -> String {
        self.port_command
            .replace("{port}", port)
            .replace("{action}", action(on))
    }

    /// Command switching every port on the hub
    pub fn fleet(&self, on: bool) -> String {
        self.fleet_command.replace("{action}", action(on))
    }
}

fn action(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let mut config = ControllerConfig::default();
        config.devices.push(DeviceDescriptor::new("d1", "192.168.2.1"));
        config.validate().unwrap();
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_validate_duplicate_ids() {
        let mut config = ControllerConfig::default();
        config.devices.push(DeviceDescriptor::new("d1", "10.0.0.1"));
        config.devices.push(DeviceDescriptor::new("d1", "10.0.0.2"));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = ControllerConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_shared_mode_line() {
        let mut config = ControllerConfig::default();
        config.mode_lines.fsk = config.mode_lines.wn;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_power_commands() {
        let power = PowerConfig::default();
        assert_eq!(power.port("3", false), "uhubctl -l 1-1 -p 3 -a off");
        assert_eq!(power.fleet(true), "uhubctl -l 1-1 -a on");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ControllerConfig = toml::from_str(
            r#"
            sync_interval = 15

            [retry]
            base_delay = 100

            [[devices]]
            id = "d1"
            address = "192.168.2.1"
            relays = [1, 0, 0]
            "#,
        )
        .unwrap();
        assert_eq!(config.sync_interval, Duration::from_secs(15));
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.ssh.username, "root");
        assert_eq!(config.devices[0].relays, Some([1, 0, 0]));
        assert_eq!(config.mode_lines.line(Mode::Ntsc), Some(5));
    }
}
