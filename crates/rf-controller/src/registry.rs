//! Read-only lookup of configured devices

use std::collections::HashMap;
use std::sync::Arc;

use rf_core::config::DeviceDescriptor;
use rf_core::{DeviceId, FleetError};

/// Device descriptors indexed by id, in configuration order
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Arc<DeviceDescriptor>>,
    order: Vec<DeviceId>,
}

impl DeviceRegistry {
    pub fn new(descriptors: impl IntoIterator<Item = DeviceDescriptor>) -> Self {
        let mut devices = HashMap::new();
        let mut order = Vec::new();
        for descriptor in descriptors {
            if devices.contains_key(&descriptor.id) {
                continue;
            }
            order.push(descriptor.id.clone());
            devices.insert(descriptor.id.clone(), Arc::new(descriptor));
        }
        Self { devices, order }
    }

    pub fn get(&self, id: &DeviceId) -> Result<Arc<DeviceDescriptor>, FleetError> {
        self.devices
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::UnknownDevice(id.clone()))
    }

    pub fn ids(&self) -> &[DeviceId] {
        &self.order
    }

    /// Descriptors in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceDescriptor>> {
        self.order.iter().filter_map(|id| self.devices.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
