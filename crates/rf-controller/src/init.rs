//! Device initialization
//!
//! Brings a radio to a known baseline: TX channels enabled, DMA buffer sized
//! and running, manual gain at zero, every mode line low. Each attribute is
//! read first and only written when it differs, so re-running `init` on a
//! configured device issues no writes.

use std::sync::Arc;

use rf_core::{DeviceId, FleetError, GainMode};

use crate::commands::{read_attribute, write_attribute, Attribute, CommandSet};
use crate::executor::CommandExecutor;
use crate::mode::ModeController;
use crate::state::StateStore;
use crate::sync::Synchronizer;

/// Gain written during initialization
const INITIAL_GAIN: &str = "0";

pub struct Initializer {
    executor: Arc<CommandExecutor>,
    store: Arc<StateStore>,
    commands: Arc<CommandSet>,
    modes: Arc<ModeController>,
    sync: Arc<Synchronizer>,
}

impl Initializer {
    pub fn new(
        executor: Arc<CommandExecutor>,
        store: Arc<StateStore>,
        commands: Arc<CommandSet>,
        modes: Arc<ModeController>,
        sync: Arc<Synchronizer>,
    ) -> Self {
        Self {
            executor,
            store,
            commands,
            modes,
            sync,
        }
    }

    /// Initialize the device and refresh its state.
    ///
    /// The device stays uninitialized if any step fails, including the final
    /// refresh.
    pub async fn init(&self, id: &DeviceId) -> Result<(), FleetError> {
        self.store
            .update(id, |s| s.initialized = false)
            .ok_or_else(|| FleetError::UnknownDevice(id.clone()))?;

        tracing::info!("Initializing {}", id);

        match self.configure(id).await {
            Ok(()) => {
                tracing::info!("{} initialized", id);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Initialization of {} failed: {}", id, e);
                self.store.update(id, |s| s.initialized = false);
                self.store.record_error(id, &e);
                Err(e)
            }
        }
    }

    async fn configure(&self, id: &DeviceId) -> Result<(), FleetError> {
        for attribute in self.commands.baseline() {
            self.ensure(id, &attribute.path, &attribute.value).await?;
        }

        self.ensure(
            id,
            self.commands.path(Attribute::GainMode),
            GainMode::Manual.as_attribute(),
        )
        .await?;
        self.ensure(id, self.commands.path(Attribute::Gain), INITIAL_GAIN)
            .await?;

        self.modes.force_off(id).await?;

        self.store.update(id, |s| s.initialized = true);
        self.sync.refresh(id).await
    }

    /// Write `desired` to `path` unless it already holds that value
    async fn ensure(&self, id: &DeviceId, path: &str, desired: &str) -> Result<(), FleetError> {
        let current = self.executor.run(id, &read_attribute(path)).await?;
        if values_match(&current, desired) {
            tracing::debug!("{}: {} already {}", id, path, desired);
            return Ok(());
        }

        tracing::debug!("{}: {} is {}, writing {}", id, path, current, desired);
        self.executor
            .run(id, &write_attribute(path, desired))
            .await?;
        Ok(())
    }
}

/// Compare an attribute reading against a desired value.
///
/// Numbers compare by value on their leading token so `0.000000 dB` matches
/// `0`; anything else compares as trimmed text.
fn values_match(current: &str, desired: &str) -> bool {
    let number = |s: &str| {
        s.split_whitespace()
            .next()
            .and_then(|token| token.parse::<f64>().ok())
    };

    match (number(current), number(desired)) {
        (Some(a), Some(b)) => a == b,
        _ => current.trim() == desired.trim(),
    }
}
