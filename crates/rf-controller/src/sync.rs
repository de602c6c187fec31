//! State synchronization
//!
//! Reads the tunable attributes back from a device and folds them into its
//! state record. Runs after every write and on a fixed timer.
//!
//! # Partial failure
//!
//! A refresh merges nothing unless every read succeeded, so a flaky device
//! keeps its last known values and only gains an `error`. Fleet refreshes go
//! device by device and never stop at a failing one.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rf_core::types::{parse_integer, ReportedGainMode};
use rf_core::{DeviceId, FleetError, GainMode};

use crate::commands::{Attribute, CommandSet};
use crate::executor::CommandExecutor;
use crate::state::{FleetReport, StateStore};

/// Values read from a device in one refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reading {
    gain_mode: GainMode,
    gain: i64,
    freq: i64,
    sampling_freq: i64,
}

/// Reconciles state records with device attributes
pub struct Synchronizer {
    executor: Arc<CommandExecutor>,
    store: Arc<StateStore>,
    commands: Arc<CommandSet>,
}

impl Synchronizer {
    pub fn new(
        executor: Arc<CommandExecutor>,
        store: Arc<StateStore>,
        commands: Arc<CommandSet>,
    ) -> Self {
        Self {
            executor,
            store,
            commands,
        }
    }

    /// Read the device's attributes into its state record
    pub async fn refresh(&self, id: &DeviceId) -> Result<(), FleetError> {
        match self.read(id).await {
            Ok(reading) => {
                self.store.update(id, |s| {
                    s.gain_mode = reading.gain_mode;
                    s.gain = reading.gain;
                    s.freq = reading.freq;
                    s.sampling_freq = reading.sampling_freq;
                    s.touch();
                });
                tracing::debug!("Refreshed {}: {:?}", id, reading);
                Ok(())
            }
            Err(e) => {
                self.store.record_error(id, &e);
                Err(e)
            }
        }
    }

    /// Refresh every connected, initialized device in turn.
    ///
    /// Devices still coming up are skipped; polling them while their setup
    /// writes are in flight makes the radio report busy.
    pub async fn refresh_all(&self) -> FleetReport {
        let mut report = FleetReport::default();

        for id in self.store.ids() {
            let ready = self
                .store
                .get(id)
                .is_some_and(|s| s.connected && s.initialized);
            if !ready {
                continue;
            }

            let result = self.refresh(id).await;
            if let Err(e) = &result {
                tracing::warn!("Refresh of {} failed: {}", id, e);
            }
            report.record(id, result);
        }

        report
    }

    /// Run [`refresh_all`](Self::refresh_all) every `interval` until cancelled
    pub async fn run_periodic(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; start one interval from now.
        ticker.tick().await;

        tracing::info!("Starting periodic sync (interval: {:?})", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.refresh_all().await;
                    if !report.is_success() {
                        tracing::info!(
                            "Periodic sync: {} refreshed, {} failed",
                            report.succeeded.len(),
                            report.failed.len()
                        );
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Periodic sync shutting down");
                    break;
                }
            }
        }
    }

    async fn read(&self, id: &DeviceId) -> Result<Reading, FleetError> {
        let gain_mode = self.read_gain_mode(id).await?;
        let gain = self.read_integer(id, Attribute::Gain).await?;
        let freq = self.read_integer(id, Attribute::Freq).await?;
        let sampling_freq = self.read_integer(id, Attribute::SamplingFreq).await?;

        Ok(Reading {
            gain_mode,
            gain,
            freq,
            sampling_freq,
        })
    }

    /// Read the gain mode, switching unsupported tracking modes to manual
    async fn read_gain_mode(&self, id: &DeviceId) -> Result<GainMode, FleetError> {
        let raw = self
            .executor
            .run(id, &self.commands.read(Attribute::GainMode))
            .await?;

        match GainMode::from_attribute(&raw)? {
            ReportedGainMode::Supported(mode) => Ok(mode),
            ReportedGainMode::Unsupported => {
                tracing::warn!("{} reports gain mode '{}', forcing manual", id, raw);
                self.executor
                    .run(
                        id,
                        &self
                            .commands
                            .write(Attribute::GainMode, GainMode::Manual.as_attribute()),
                    )
                    .await?;
                Ok(GainMode::Manual)
            }
        }
    }

    async fn read_integer(&self, id: &DeviceId, attribute: Attribute) -> Result<i64, FleetError> {
        let raw = self.executor.run(id, &self.commands.read(attribute)).await?;
        parse_integer(&raw).map_err(|_| {
            FleetError::InvalidValue(format!(
                "{} returned '{}' for {}",
                id,
                raw,
                self.commands.path(attribute)
            ))
        })
    }
}
