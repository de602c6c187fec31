//! Generation mode state machine
//!
//! A device has five mode lines and at most one of them may be high. Every
//! transition first drives all five low, then raises only the target's line,
//! so no two modes are ever on together.

use async_trait::async_trait;
use std::sync::Arc;

use rf_core::{DeviceId, FleetError, Mode};

use crate::commands::{Attribute, CommandSet};
use crate::executor::CommandExecutor;
use crate::state::StateStore;
use crate::sync::Synchronizer;

/// Notified after a device's mode has been committed to its state record
#[async_trait]
pub trait ModeListener: Send + Sync {
    async fn mode_changed(&self, device: &DeviceId, mode: Mode);
}

/// Drives mode lines and keeps the mode vector and `tx_on` in step
pub struct ModeController {
    executor: Arc<CommandExecutor>,
    store: Arc<StateStore>,
    commands: Arc<CommandSet>,
    sync: Arc<Synchronizer>,
    listeners: Vec<Arc<dyn ModeListener>>,
}

impl ModeController {
    pub fn new(
        executor: Arc<CommandExecutor>,
        store: Arc<StateStore>,
        commands: Arc<CommandSet>,
        sync: Arc<Synchronizer>,
        listeners: Vec<Arc<dyn ModeListener>>,
    ) -> Self {
        Self {
            executor,
            store,
            commands,
            sync,
            listeners,
        }
    }

    /// Switch the device to `target`, then refresh its state.
    ///
    /// Entering [`Mode::Ntsc`] also sets the sample rate to
    /// [`Mode::NTSC_SAMPLING_FREQ`]; leaving it keeps whatever rate is set.
    pub async fn set_mode(&self, id: &DeviceId, target: Mode) -> Result<(), FleetError> {
        let state = self
            .store
            .get(id)
            .ok_or_else(|| FleetError::UnknownDevice(id.clone()))?;
        if !state.initialized {
            return Err(FleetError::NotInitialized(id.clone()));
        }

        if let Err(e) = self.transition(id, target).await {
            self.store.record_error(id, &e);
            return Err(e);
        }

        self.sync.refresh(id).await
    }

    /// Drive every mode line low and record `Mode::None`.
    ///
    /// Does not require the device to be initialized; used to bring TX to a
    /// known state during setup.
    pub async fn force_off(&self, id: &DeviceId) -> Result<(), FleetError> {
        self.all_off(id).await?;
        self.commit(id, Mode::None).await;
        Ok(())
    }

    /// Record `Mode::None` without touching the lines, for a device whose
    /// lines already dropped because it lost power
    pub async fn mark_off(&self, id: &DeviceId) {
        self.commit(id, Mode::None).await;
    }

    async fn transition(&self, id: &DeviceId, target: Mode) -> Result<(), FleetError> {
        self.all_off(id).await?;

        if let Err(e) = self.engage(id, target).await {
            // Every line is low at this point.
            self.commit(id, Mode::None).await;
            return Err(e);
        }

        self.commit(id, target).await;
        Ok(())
    }

    async fn all_off(&self, id: &DeviceId) -> Result<(), FleetError> {
        for mode in Mode::ACTIVE {
            if let Some(command) = self.commands.mode_line(mode, false) {
                self.executor.run(id, &command).await?;
            }
        }
        Ok(())
    }

    async fn engage(&self, id: &DeviceId, target: Mode) -> Result<(), FleetError> {
        if target == Mode::Ntsc {
            let rate = Mode::NTSC_SAMPLING_FREQ.to_string();
            self.executor
                .run(id, &self.commands.write(Attribute::SamplingFreq, &rate))
                .await?;
        }

        if let Some(command) = self.commands.mode_line(target, true) {
            self.executor.run(id, &command).await?;
        }
        Ok(())
    }

    async fn commit(&self, id: &DeviceId, mode: Mode) {
        self.store.update(id, |s| {
            s.set_mode(mode);
            if mode == Mode::Ntsc {
                s.sampling_freq = Mode::NTSC_SAMPLING_FREQ;
            }
        });
        tracing::info!("{} mode set to {}", id, mode);

        for listener in &self.listeners {
            listener.mode_changed(id, mode).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::config::{AttributeConfig, DeviceDescriptor, ModeLineConfig, RetryConfig};
    use rf_test_harness::MockShell;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::registry::DeviceRegistry;
    use crate::session::SessionPool;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(DeviceId, Mode)>>,
    }

    #[async_trait]
    impl ModeListener for Recorder {
        async fn mode_changed(&self, device: &DeviceId, mode: Mode) {
            self.events.lock().unwrap().push((device.clone(), mode));
        }
    }

    struct Rig {
        shell: MockShell,
        store: Arc<StateStore>,
        modes: ModeController,
        recorder: Arc<Recorder>,
        id: DeviceId,
    }

    fn rig() -> Rig {
        let shell = MockShell::with_attributes(&AttributeConfig::default());
        let registry = Arc::new(DeviceRegistry::new([DeviceDescriptor::new("d1", "d1.local")]));
        let store = Arc::new(StateStore::new(registry.ids().to_vec()));
        let pool = Arc::new(SessionPool::new(
            Arc::new(shell.clone()),
            registry,
            Arc::clone(&store),
            Duration::from_secs(5),
        ));
        let executor = Arc::new(CommandExecutor::new(
            pool,
            &RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(10),
            },
        ));
        let commands = Arc::new(CommandSet::default());
        let sync = Arc::new(Synchronizer::new(
            Arc::clone(&executor),
            Arc::clone(&store),
            Arc::clone(&commands),
        ));
        let recorder = Arc::new(Recorder::default());
        let modes = ModeController::new(
            executor,
            Arc::clone(&store),
            commands,
            sync,
            vec![recorder.clone() as Arc<dyn ModeListener>],
        );
        let id = DeviceId::new("d1");
        store.update(&id, |s| {
            s.connected = true;
            s.initialized = true;
        });
        Rig {
            shell,
            store,
            modes,
            recorder,
            id,
        }
    }

    fn high_lines(rig: &Rig) -> Vec<Mode> {
        let lines = ModeLineConfig::default();
        Mode::ACTIVE
            .into_iter()
            .filter(|m| rig.shell.line(&rig.id, lines.line(*m).unwrap()) == Some(true))
            .collect()
    }

    #[tokio::test]
    async fn test_set_mode_raises_only_target_line() {
        let rig = rig();

        rig.modes.set_mode(&rig.id, Mode::Fsk).await.unwrap();
        rig.modes.set_mode(&rig.id, Mode::Wn).await.unwrap();

        assert_eq!(high_lines(&rig), vec![Mode::Wn]);
        let state = rig.store.get(&rig.id).unwrap();
        assert_eq!(state.mode(), Mode::Wn);
        assert!(state.mode_flags().wn);
        assert_eq!(state.mode_flags().active_count(), 1);
        assert!(state.tx_on());
    }

    #[tokio::test]
    async fn test_all_lines_dropped_before_target_raised() {
        let rig = rig();
        rig.modes.set_mode(&rig.id, Mode::Bpsk).await.unwrap();

        let lines: Vec<String> = rig
            .shell
            .commands(&rig.id)
            .into_iter()
            .filter(|c| c.starts_with("gpioset"))
            .collect();
        assert_eq!(
            lines,
            vec![
                "gpioset gpiochip0 1=0",
                "gpioset gpiochip0 2=0",
                "gpioset gpiochip0 3=0",
                "gpioset gpiochip0 4=0",
                "gpioset gpiochip0 5=0",
                "gpioset gpiochip0 3=1",
            ]
        );
    }

    #[tokio::test]
    async fn test_ntsc_forces_sampling_rate() {
        let rig = rig();

        rig.modes.set_mode(&rig.id, Mode::Ntsc).await.unwrap();
        assert_eq!(rig.store.get(&rig.id).unwrap().sampling_freq, 20_000_000);

        // Leaving NTSC keeps the rate.
        rig.modes.set_mode(&rig.id, Mode::Qpsk).await.unwrap();
        assert_eq!(rig.store.get(&rig.id).unwrap().sampling_freq, 20_000_000);
    }

    #[tokio::test]
    async fn test_none_turns_tx_off() {
        let rig = rig();
        rig.modes.set_mode(&rig.id, Mode::Qpsk).await.unwrap();
        rig.modes.set_mode(&rig.id, Mode::None).await.unwrap();

        let state = rig.store.get(&rig.id).unwrap();
        assert!(!state.tx_on());
        assert_eq!(state.mode_flags().active_count(), 0);
        assert!(high_lines(&rig).is_empty());
    }

    #[tokio::test]
    async fn test_rejected_when_not_initialized() {
        let rig = rig();
        rig.store.update(&rig.id, |s| s.initialized = false);

        assert_eq!(
            rig.modes.set_mode(&rig.id, Mode::Wn).await.unwrap_err(),
            FleetError::NotInitialized(rig.id.clone())
        );
        assert!(rig.shell.commands(&rig.id).is_empty());
        assert!(rig.recorder.events.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_engage_commits_none() {
        let rig = rig();
        rig.modes.set_mode(&rig.id, Mode::Wn).await.unwrap();
        rig.shell.fail_command(&rig.id, "gpiochip0 2=1", usize::MAX);

        assert!(rig.modes.set_mode(&rig.id, Mode::Fsk).await.is_err());

        let state = rig.store.get(&rig.id).unwrap();
        assert_eq!(state.mode(), Mode::None);
        assert!(!state.tx_on());
        assert!(state.error.is_some());
        assert!(high_lines(&rig).is_empty());
    }

    #[tokio::test]
    async fn test_listeners_notified_after_commit() {
        let rig = rig();
        rig.modes.set_mode(&rig.id, Mode::Wn).await.unwrap();
        rig.modes.force_off(&rig.id).await.unwrap();

        let events = rig.recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![(rig.id.clone(), Mode::Wn), (rig.id.clone(), Mode::None)]
        );
    }

    #[tokio::test]
    async fn test_mark_off_commits_without_commands() {
        let rig = rig();
        rig.modes.set_mode(&rig.id, Mode::Qpsk).await.unwrap();
        rig.shell.clear_history(&rig.id);

        rig.modes.mark_off(&rig.id).await;

        assert!(rig.shell.commands(&rig.id).is_empty());
        assert!(!rig.store.get(&rig.id).unwrap().tx_on());
        assert_eq!(
            rig.recorder.events.lock().unwrap().last(),
            Some(&(rig.id.clone(), Mode::None))
        );
    }
}
