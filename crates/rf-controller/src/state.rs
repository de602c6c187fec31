//! In-memory device state records

use dashmap::DashMap;
use serde::Serialize;

use rf_core::time::current_time_millis;
use rf_core::{DeviceId, FleetError, GainMode, Mode, ModeFlags};

/// Cached view of one radio
///
/// The mode, its flag vector and `tx_on` only change together through
/// [`DeviceState::set_mode`], so at most one flag is ever set and `tx_on`
/// always matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub connected: bool,
    pub initialized: bool,
    /// Most recent failure, cleared by the next successful operation
    pub error: Option<String>,
    /// Unix millis of the last successful refresh
    pub last_updated: Option<u64>,
    pub gain: i64,
    pub gain_mode: GainMode,
    pub freq: i64,
    pub sampling_freq: i64,
    mode: Mode,
    modes: ModeFlags,
    tx_on: bool,
}

impl DeviceState {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn mode_flags(&self) -> ModeFlags {
        self.modes
    }

    pub fn tx_on(&self) -> bool {
        self.tx_on
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.modes = mode.flags();
        self.tx_on = mode.is_transmitting();
    }

    /// Session gone; the device must be initialized again before writes
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
        self.initialized = false;
    }

    pub fn touch(&mut self) {
        self.last_updated = Some(current_time_millis());
        self.error = None;
    }
}

/// Outcome of an operation applied to several devices in turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetReport {
    pub succeeded: Vec<DeviceId>,
    pub failed: Vec<(DeviceId, FleetError)>,
}

impl FleetReport {
    pub fn record(&mut self, device: &DeviceId, result: Result<(), FleetError>) {
        match result {
            Ok(()) => self.succeeded.push(device.clone()),
            Err(e) => self.failed.push((device.clone(), e)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Canonical per-device state, keyed by device id
///
/// Records exist for every configured device from construction until drop;
/// unknown ids are ignored by the mutators.
pub struct StateStore {
    order: Vec<DeviceId>,
    records: DashMap<DeviceId, DeviceState>,
}

impl StateStore {
    /// Create disconnected, zeroed records for `ids`
    pub fn new(ids: impl IntoIterator<Item = DeviceId>) -> Self {
        let order: Vec<DeviceId> = ids.into_iter().collect();
        let records = order
            .iter()
            .map(|id| (id.clone(), DeviceState::default()))
            .collect();
        Self { order, records }
    }

    /// Snapshot of one record
    pub fn get(&self, id: &DeviceId) -> Option<DeviceState> {
        self.records.get(id).map(|r| r.clone())
    }

    /// Mutate one record in place
    pub fn update<R>(&self, id: &DeviceId, f: impl FnOnce(&mut DeviceState) -> R) -> Option<R> {
        self.records.get_mut(id).map(|mut r| f(r.value_mut()))
    }

    pub fn record_error(&self, id: &DeviceId, error: &FleetError) {
        self.update(id, |s| s.error = Some(error.to_string()));
    }

    /// Device ids in configuration order
    pub fn ids(&self) -> &[DeviceId] {
        &self.order
    }

    /// Snapshot of every record in configuration order
    pub fn snapshot(&self) -> Vec<(DeviceId, DeviceState)> {
        self.order
            .iter()
            .filter_map(|id| self.get(id).map(|s| (id.clone(), s)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
