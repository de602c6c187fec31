//! Static device descriptors

use serde::{Deserialize, Serialize};

use crate::types::DeviceId;

/// Number of shared relay lines driven by the controller host
pub const RELAY_COUNT: usize = 3;

/// A radio in the fleet, as loaded from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique device id
    pub id: DeviceId,

    /// Host name or address, optionally with `:port`
    pub address: String,

    /// USB hub port feeding this device, substituted into the power command
    #[serde(default)]
    pub power_port: Option<String>,

    /// Relay activation vector; non-zero entries map this device to a relay
    #[serde(default)]
    pub relays: Option<[u8; RELAY_COUNT]>,
}

impl DeviceDescriptor {
    /// Create a descriptor with no power or relay wiring
    pub fn new(id: impl Into<DeviceId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            power_port: None,
            relays: None,
        }
    }

    /// Whether this device maps to relay `index`
    pub fn drives_relay(&self, index: usize) -> bool {
        self.relays
            .and_then(|r| r.get(index).copied())
            .is_some_and(|v| v != 0)
    }

    /// Address with `default_port` appended when none was configured
    pub fn socket_address(&self, default_port: u16) -> String {
        let has_port = match self.address.rsplit_once(':') {
            Some((host, port)) => {
                port.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']'))
            }
            None => false,
        };
        if has_port {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, default_port)
        }
    }
}
