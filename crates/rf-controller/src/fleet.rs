//! Fleet facade
//!
//! [`Fleet`] wires the session pool, executor, synchronizer, initializer,
//! mode controller and power hardware together and is the only type a
//! request layer needs. Every write to a device runs under that device's
//! operation lock, so two requests for the same radio never interleave their
//! commands. Requests for different radios run concurrently.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rf_core::config::{ControllerConfig, RELAY_COUNT};
use rf_core::traits::{HostShell, RemoteShell};
use rf_core::types::parse_exact_integer;
use rf_core::{DeviceId, FleetError, GainMode, Mode};

use crate::commands::{Attribute, CommandSet};
use crate::executor::CommandExecutor;
use crate::init::Initializer;
use crate::mode::{ModeController, ModeListener};
use crate::power::{PowerOrchestrator, RelayBank};
use crate::registry::DeviceRegistry;
use crate::session::SessionPool;
use crate::state::{DeviceState, FleetReport, StateStore};
use crate::sync::Synchronizer;

/// A tunable that can be set from its textual form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Gain,
    GainMode,
    Freq,
    SamplingFreq,
}

impl Parameter {
    pub fn as_str(self) -> &'static str {
        match self {
            Parameter::Gain => "gain",
            Parameter::GainMode => "gain_mode",
            Parameter::Freq => "freq",
            Parameter::SamplingFreq => "sampling_freq",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parameter {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gain" => Ok(Parameter::Gain),
            "gain_mode" => Ok(Parameter::GainMode),
            "freq" => Ok(Parameter::Freq),
            "sampling_freq" => Ok(Parameter::SamplingFreq),
            other => Err(FleetError::InvalidValue(format!(
                "unknown parameter '{}'",
                other
            ))),
        }
    }
}

/// What to power cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerTarget {
    Device(DeviceId),
    Fleet,
}

/// The controller's view of every radio
pub struct Fleet {
    registry: Arc<DeviceRegistry>,
    store: Arc<StateStore>,
    pool: Arc<SessionPool>,
    executor: Arc<CommandExecutor>,
    commands: Arc<CommandSet>,
    sync: Arc<Synchronizer>,
    modes: Arc<ModeController>,
    initializer: Arc<Initializer>,
    relays: Arc<RelayBank>,
    power: PowerOrchestrator,
    locks: HashMap<DeviceId, Arc<Mutex<()>>>,
    sync_interval: Duration,
}

impl Fleet {
    /// Build a fleet from a validated configuration.
    ///
    /// No device is contacted until the first operation.
    pub fn new(
        config: &ControllerConfig,
        shell: Arc<dyn RemoteShell>,
        host: Arc<dyn HostShell>,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new(config.devices.iter().cloned()));
        let store = Arc::new(StateStore::new(registry.ids().to_vec()));
        let pool = Arc::new(SessionPool::new(
            shell,
            Arc::clone(&registry),
            Arc::clone(&store),
            config.ssh.connect_timeout,
        ));
        let executor = Arc::new(CommandExecutor::new(Arc::clone(&pool), &config.retry));
        let commands = Arc::new(CommandSet::new(
            config.attributes.clone(),
            config.mode_lines.clone(),
        ));
        let sync = Arc::new(Synchronizer::new(
            Arc::clone(&executor),
            Arc::clone(&store),
            Arc::clone(&commands),
        ));
        let relays = Arc::new(RelayBank::new(
            Arc::clone(&host),
            Arc::clone(&store),
            Arc::clone(&registry),
            config.relays.clone(),
        ));
        let modes = Arc::new(ModeController::new(
            Arc::clone(&executor),
            Arc::clone(&store),
            Arc::clone(&commands),
            Arc::clone(&sync),
            vec![Arc::clone(&relays) as Arc<dyn ModeListener>],
        ));
        let initializer = Arc::new(Initializer::new(
            Arc::clone(&executor),
            Arc::clone(&store),
            Arc::clone(&commands),
            Arc::clone(&modes),
            Arc::clone(&sync),
        ));
        let power = PowerOrchestrator::new(
            host,
            Arc::clone(&pool),
            Arc::clone(&registry),
            Arc::clone(&initializer),
            Arc::clone(&modes),
            config.power.clone(),
        );
        let locks = registry
            .ids()
            .iter()
            .map(|id| (id.clone(), Arc::new(Mutex::new(()))))
            .collect();

        Self {
            registry,
            store,
            pool,
            executor,
            commands,
            sync,
            modes,
            initializer,
            relays,
            power,
            locks,
            sync_interval: config.sync_interval,
        }
    }

    /// Device ids in configuration order
    pub fn device_ids(&self) -> &[DeviceId] {
        self.registry.ids()
    }

    /// Snapshot of one device's state
    pub fn state(&self, id: &DeviceId) -> Result<DeviceState, FleetError> {
        self.store
            .get(id)
            .ok_or_else(|| FleetError::UnknownDevice(id.clone()))
    }

    /// Snapshot of every device's state, in configuration order
    pub fn states(&self) -> Vec<(DeviceId, DeviceState)> {
        self.store.snapshot()
    }

    /// Relay vector last written to the controller's relay lines
    pub async fn relay_state(&self) -> [bool; RELAY_COUNT] {
        self.relays.energized().await
    }

    /// Connect and initialize every device in turn.
    ///
    /// A device that fails is reported and the rest still come up.
    pub async fn bring_up(&self) -> FleetReport {
        tracing::info!("Bringing up {} devices", self.registry.len());

        let mut report = FleetReport::default();
        for id in self.registry.ids() {
            let result = match self.lock(id).await {
                Ok(_guard) => self.initializer.init(id).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                tracing::error!("Failed to bring up {}: {}", id, e);
            }
            report.record(id, result);
        }

        tracing::info!(
            "Bring-up complete: {} ready, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    /// Initialize a device, connecting first if needed
    pub async fn init(&self, id: &DeviceId) -> Result<(), FleetError> {
        let _guard = self.lock(id).await?;
        self.initializer.init(id).await
    }

    /// Drop the device's session and initialize it over a fresh one
    pub async fn reconnect(&self, id: &DeviceId) -> Result<(), FleetError> {
        let _guard = self.lock(id).await?;
        tracing::info!("Reconnecting {}", id);
        self.pool.reset(id).await;
        self.initializer.init(id).await
    }

    /// Read the device's attributes into its state record
    pub async fn refresh(&self, id: &DeviceId) -> Result<(), FleetError> {
        self.registry.get(id)?;
        self.sync.refresh(id).await
    }

    /// Refresh every connected, initialized device
    pub async fn refresh_all(&self) -> FleetReport {
        self.sync.refresh_all().await
    }

    pub async fn set_gain(&self, id: &DeviceId, gain: i64) -> Result<(), FleetError> {
        self.write_tunable(id, Attribute::Gain, &gain.to_string())
            .await
    }

    pub async fn set_gain_mode(&self, id: &DeviceId, mode: GainMode) -> Result<(), FleetError> {
        self.write_tunable(id, Attribute::GainMode, mode.as_attribute())
            .await
    }

    pub async fn set_freq(&self, id: &DeviceId, freq: i64) -> Result<(), FleetError> {
        let freq = positive(Parameter::Freq, freq)?;
        self.write_tunable(id, Attribute::Freq, &freq.to_string())
            .await
    }

    pub async fn set_sampling_freq(&self, id: &DeviceId, rate: i64) -> Result<(), FleetError> {
        let rate = positive(Parameter::SamplingFreq, rate)?;
        self.write_tunable(id, Attribute::SamplingFreq, &rate.to_string())
            .await
    }

    /// Set a tunable from its textual value
    pub async fn set_parameter(
        &self,
        id: &DeviceId,
        parameter: Parameter,
        value: &str,
    ) -> Result<(), FleetError> {
        let integer = || {
            parse_exact_integer(value).map_err(|_| {
                FleetError::InvalidValue(format!("{} must be a number, got '{}'", parameter, value))
            })
        };

        match parameter {
            Parameter::Gain => self.set_gain(id, integer()?).await,
            Parameter::GainMode => self.set_gain_mode(id, value.parse()?).await,
            Parameter::Freq => self.set_freq(id, integer()?).await,
            Parameter::SamplingFreq => self.set_sampling_freq(id, integer()?).await,
        }
    }

    /// Switch the device's generation mode
    pub async fn set_mode(&self, id: &DeviceId, mode: Mode) -> Result<(), FleetError> {
        let _guard = self.lock(id).await?;
        self.modes.set_mode(id, mode).await
    }

    /// Power cycle one device or the whole hub, then bring the affected
    /// devices back up.
    ///
    /// A single-device cycle fails if the device does not come back; a fleet
    /// cycle only fails on the hub command itself and reports per-device
    /// outcomes.
    pub async fn restart_power(&self, target: PowerTarget) -> Result<FleetReport, FleetError> {
        match target {
            PowerTarget::Device(id) => {
                let _guard = self.lock(&id).await?;
                match self.power.cycle_device(&id).await {
                    Ok(()) => {
                        let mut report = FleetReport::default();
                        report.record(&id, Ok(()));
                        Ok(report)
                    }
                    Err(e) => {
                        self.store.record_error(&id, &e);
                        Err(e)
                    }
                }
            }
            PowerTarget::Fleet => {
                let mut guards = Vec::with_capacity(self.registry.len());
                for id in self.registry.ids() {
                    guards.push(self.lock(id).await?);
                }
                self.power.cycle_fleet().await
            }
        }
    }

    /// Run the periodic synchronizer until `cancel` fires
    pub fn spawn_sync(&self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.sync).run_periodic(self.sync_interval, cancel))
    }

    /// Close every session
    pub async fn shutdown(&self) {
        tracing::info!("Closing all device sessions");
        self.pool.close_all().await;
    }

    async fn write_tunable(
        &self,
        id: &DeviceId,
        attribute: Attribute,
        value: &str,
    ) -> Result<(), FleetError> {
        let _guard = self.lock(id).await?;

        if !self.state(id)?.initialized {
            return Err(FleetError::NotInitialized(id.clone()));
        }

        let command = self.commands.write(attribute, value);
        if let Err(e) = self.executor.run(id, &command).await {
            self.store.record_error(id, &e);
            return Err(e);
        }
        tracing::info!("{}: {} set to {}", id, self.commands.path(attribute), value);

        self.sync.refresh(id).await
    }

    async fn lock(&self, id: &DeviceId) -> Result<OwnedMutexGuard<()>, FleetError> {
        let lock = self
            .locks
            .get(id)
            .ok_or_else(|| FleetError::UnknownDevice(id.clone()))?;
        Ok(Arc::clone(lock).lock_owned().await)
    }
}

fn positive(parameter: Parameter, value: i64) -> Result<i64, FleetError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(FleetError::InvalidValue(format!(
            "{} must be positive, got {}",
            parameter, value
        )))
    }
}
