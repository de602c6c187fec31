//! Controller-host hardware: shared relays and USB power ports
//!
//! Both live on the controller, not on the radios, so their commands go
//! through the [`HostShell`] rather than a device session.

use async_trait::async_trait;
use std::sync::Arc;

use tokio::sync::Mutex;

use rf_core::config::{PowerConfig, RelayConfig, RELAY_COUNT};
use rf_core::traits::HostShell;
use rf_core::{DeviceId, FleetError, Mode};

use crate::commands::set_line;
use crate::init::Initializer;
use crate::mode::{ModeController, ModeListener};
use crate::registry::DeviceRegistry;
use crate::session::SessionPool;
use crate::state::{FleetReport, StateStore};

/// The three shared relays.
///
/// A relay is energized while any transmitting device maps to it. The lines
/// are active-low: energizing a relay drives its line to `0`.
pub struct RelayBank {
    host: Arc<dyn HostShell>,
    store: Arc<StateStore>,
    registry: Arc<DeviceRegistry>,
    config: RelayConfig,
    energized: Mutex<[bool; RELAY_COUNT]>,
}

impl RelayBank {
    pub fn new(
        host: Arc<dyn HostShell>,
        store: Arc<StateStore>,
        registry: Arc<DeviceRegistry>,
        config: RelayConfig,
    ) -> Self {
        Self {
            host,
            store,
            registry,
            config,
            energized: Mutex::new([false; RELAY_COUNT]),
        }
    }

    /// Relay vector last applied
    pub async fn energized(&self) -> [bool; RELAY_COUNT] {
        *self.energized.lock().await
    }

    /// Recompute the relay vector from current state and write every line.
    ///
    /// A failed line write is logged and the remaining lines are still
    /// written.
    pub async fn apply(&self) -> [bool; RELAY_COUNT] {
        let mut applied = self.energized.lock().await;
        let desired = self.desired();

        for (index, energize) in desired.iter().copied().enumerate() {
            let line = self.config.lines[index];
            let command = set_line(&self.config.chip, line, !energize);

            match self.host.run(&command).await {
                Ok(output) if output.success() => {}
                Ok(output) => tracing::warn!(
                    "Relay {} (line {}) write failed: {}",
                    index,
                    line,
                    output.failure_reason()
                ),
                Err(e) => tracing::warn!("Relay {} (line {}) write failed: {}", index, line, e),
            }
        }

        if *applied != desired {
            tracing::info!("Relays now {:?}", desired);
        }
        *applied = desired;
        desired
    }

    fn desired(&self) -> [bool; RELAY_COUNT] {
        let mut relays = [false; RELAY_COUNT];
        for descriptor in self.registry.iter() {
            let transmitting = self
                .store
                .get(&descriptor.id)
                .is_some_and(|s| s.tx_on());
            if !transmitting {
                continue;
            }
            for (index, relay) in relays.iter_mut().enumerate() {
                *relay |= descriptor.drives_relay(index);
            }
        }
        relays
    }
}

#[async_trait]
impl ModeListener for RelayBank {
    async fn mode_changed(&self, _device: &DeviceId, _mode: Mode) {
        self.apply().await;
    }
}

/// Power-cycles radios through the controller's USB hub
pub struct PowerOrchestrator {
    host: Arc<dyn HostShell>,
    pool: Arc<SessionPool>,
    registry: Arc<DeviceRegistry>,
    initializer: Arc<Initializer>,
    modes: Arc<ModeController>,
    config: PowerConfig,
}

impl PowerOrchestrator {
    pub fn new(
        host: Arc<dyn HostShell>,
        pool: Arc<SessionPool>,
        registry: Arc<DeviceRegistry>,
        initializer: Arc<Initializer>,
        modes: Arc<ModeController>,
        config: PowerConfig,
    ) -> Self {
        Self {
            host,
            pool,
            registry,
            initializer,
            modes,
            config,
        }
    }

    /// Cycle one device's port and bring it back up
    pub async fn cycle_device(&self, id: &DeviceId) -> Result<(), FleetError> {
        let descriptor = self.registry.get(id)?;
        let port = descriptor.power_port.as_deref().ok_or_else(|| {
            FleetError::PowerCycleFailure(format!("{} has no power port configured", id))
        })?;

        tracing::info!("Power cycling {} (port {})", id, port);

        self.switch(&self.config.port(port, false)).await?;
        self.powered_off(id).await;
        tokio::time::sleep(self.config.settle_delay).await;
        self.switch(&self.config.port(port, true)).await?;

        self.bring_up(id).await
    }

    /// Cycle every port on the hub, then bring each device up in order.
    ///
    /// Only a failed off/on command is an error; devices that fail to come
    /// back are listed in the report.
    pub async fn cycle_fleet(&self) -> Result<FleetReport, FleetError> {
        tracing::info!("Power cycling fleet ({} devices)", self.registry.len());

        self.switch(&self.config.fleet(false)).await?;
        for id in self.registry.ids() {
            self.powered_off(id).await;
        }
        tokio::time::sleep(self.config.settle_delay).await;
        self.switch(&self.config.fleet(true)).await?;

        let mut report = FleetReport::default();
        for id in self.registry.ids() {
            let result = self.bring_up(id).await;
            if let Err(e) = &result {
                tracing::error!("{} did not come back after power cycle: {}", id, e);
            }
            report.record(id, result);
        }
        Ok(report)
    }

    async fn switch(&self, command: &str) -> Result<(), FleetError> {
        let output = self
            .host
            .run(command)
            .await
            .map_err(|e| FleetError::PowerCycleFailure(format!("`{}`: {}", command, e)))?;

        if !output.success() {
            return Err(FleetError::PowerCycleFailure(format!(
                "`{}` exited {}: {}",
                command,
                output.exit_code,
                output.failure_reason()
            )));
        }
        Ok(())
    }

    /// The device lost power: its session is gone and every mode line is low
    async fn powered_off(&self, id: &DeviceId) {
        self.pool.reset(id).await;
        self.modes.mark_off(id).await;
    }

    async fn bring_up(&self, id: &DeviceId) -> Result<(), FleetError> {
        self.pool.acquire(id).await?;
        self.initializer.init(id).await
    }
}
