//! Simulated radios behind a mock remote shell.
//!
//! Each device id gets its own attribute map and line bank, created on first
//! use. Reads of unknown attributes fail the way `cat` does on a missing
//! sysfs node.
//!
//! # Example
//!
//! ```
//! use rf_core::DeviceId;
//! use rf_test_harness::MockShell;
//!
//! let shell = MockShell::new();
//! let d1 = DeviceId::new("d1");
//! shell.set_attribute(&d1, "/sys/gain", "10");
//!
//! // Every command containing "/sys/gain" fails twice, then succeeds.
//! shell.fail_command(&d1, "/sys/gain", 2);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use rf_core::config::{AttributeConfig, DeviceDescriptor};
use rf_core::traits::{CommandOutput, RemoteShell, ShellSession};
use rf_core::{DeviceId, ShellError};

use crate::{ParsedCommand, BUSY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    /// Command runs but exits non-zero
    Exit,
    /// Connection drops mid-command
    Transport,
}

#[derive(Debug)]
struct FailureRule {
    needle: String,
    remaining: usize,
    kind: FailureKind,
}

#[derive(Default)]
struct SimDevice {
    attributes: HashMap<String, String>,
    lines: HashMap<u32, bool>,
    history: Vec<(Instant, String)>,
    rules: Vec<FailureRule>,
    connect_failures: usize,
    connects: usize,
    sessions: Vec<CancellationToken>,
}

impl SimDevice {
    fn take_failure(&mut self, command: &str) -> Option<FailureKind> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.remaining > 0 && command.contains(&r.needle))?;
        rule.remaining -= 1;
        Some(rule.kind)
    }

    fn apply(&mut self, command: &str) -> CommandOutput {
        match ParsedCommand::parse(command) {
            ParsedCommand::Read { path } => match self.attributes.get(&path) {
                Some(value) => CommandOutput::ok(format!("{}\n", value)),
                None => CommandOutput::failed(1, format!("cat: {}: No such file or directory", path)),
            },
            ParsedCommand::Write { path, value } => {
                self.attributes.insert(path, value);
                CommandOutput::ok("")
            }
            ParsedCommand::Line { line, high } => {
                self.lines.insert(line, high);
                CommandOutput::ok("")
            }
            ParsedCommand::Other => CommandOutput::ok(""),
        }
    }
}

#[derive(Default)]
struct Inner {
    devices: HashMap<DeviceId, SimDevice>,
    seed: HashMap<String, String>,
    connect_delay: Duration,
}

/// Mock [`RemoteShell`]; clones share the same simulated fleet
#[derive(Clone, Default)]
pub struct MockShell {
    inner: Arc<Mutex<Inner>>,
}

impl MockShell {
    /// Fleet whose devices start with no attributes
    pub fn new() -> Self {
        Self::default()
    }

    /// Fleet whose devices start with freshly-booted radio values for the
    /// configured attribute paths: auto gain tracking, high gain, and every
    /// baseline attribute at a value different from the desired one.
    pub fn with_attributes(config: &AttributeConfig) -> Self {
        let shell = Self::new();
        {
            let mut inner = shell.inner.lock().unwrap();
            inner.seed.insert(config.gain_mode.clone(), "slow_attack".into());
            inner.seed.insert(config.gain.clone(), "71.000000 dB".into());
            inner.seed.insert(config.freq.clone(), "2400000000".into());
            inner.seed.insert(config.sampling_freq.clone(), "30720000".into());
            for attribute in &config.baseline {
                let boot = if attribute.value == "0" { "1" } else { "0" };
                inner.seed.insert(attribute.path.clone(), boot.into());
            }
        }
        shell
    }

    fn device<R>(&self, id: &DeviceId, f: impl FnOnce(&mut SimDevice) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        let seed = inner.seed.clone();
        let device = inner.devices.entry(id.clone()).or_insert_with(|| SimDevice {
            attributes: seed,
            ..Default::default()
        });
        f(device)
    }

    pub fn set_attribute(&self, id: &DeviceId, path: &str, value: &str) {
        self.device(id, |d| d.attributes.insert(path.to_string(), value.to_string()));
    }

    pub fn attribute(&self, id: &DeviceId, path: &str) -> Option<String> {
        self.device(id, |d| d.attributes.get(path).cloned())
    }

    /// Current level of a discrete line, if it was ever driven
    pub fn line(&self, id: &DeviceId, line: u32) -> Option<bool> {
        self.device(id, |d| d.lines.get(&line).copied())
    }

    /// Delay every handshake by `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().connect_delay = delay;
    }

    /// Reject the next `times` handshakes to `id`
    pub fn fail_connects(&self, id: &DeviceId, times: usize) {
        self.device(id, |d| d.connect_failures = times);
    }

    /// Handshakes attempted to `id`, failed ones included
    pub fn connect_count(&self, id: &DeviceId) -> usize {
        self.device(id, |d| d.connects)
    }

    /// Make the next `times` commands containing `needle` exit 1
    pub fn fail_command(&self, id: &DeviceId, needle: &str, times: usize) {
        self.add_rule(id, needle, times, FailureKind::Exit);
    }

    /// Drop the session on the next `times` commands containing `needle`
    pub fn break_transport(&self, id: &DeviceId, needle: &str, times: usize) {
        self.add_rule(id, needle, times, FailureKind::Transport);
    }

    fn add_rule(&self, id: &DeviceId, needle: &str, times: usize, kind: FailureKind) {
        self.device(id, |d| {
            d.rules.push(FailureRule {
                needle: needle.to_string(),
                remaining: times,
                kind,
            })
        });
    }

    /// Close every open session to `id` as if the radio went away
    pub fn drop_sessions(&self, id: &DeviceId) {
        self.device(id, |d| {
            for token in d.sessions.drain(..) {
                token.cancel();
            }
        });
    }

    /// Commands executed on `id`, oldest first
    pub fn commands(&self, id: &DeviceId) -> Vec<String> {
        self.device(id, |d| d.history.iter().map(|(_, c)| c.clone()).collect())
    }

    /// Commands with the instant each was received
    pub fn history(&self, id: &DeviceId) -> Vec<(Instant, String)> {
        self.device(id, |d| d.history.clone())
    }

    /// Attribute writes executed on `id`
    pub fn writes(&self, id: &DeviceId) -> Vec<String> {
        self.commands(id)
            .into_iter()
            .filter(|c| matches!(ParsedCommand::parse(c), ParsedCommand::Write { .. }))
            .collect()
    }

    pub fn clear_history(&self, id: &DeviceId) {
        self.device(id, |d| d.history.clear());
    }

    fn execute_on(
        &self,
        id: &DeviceId,
        session: &CancellationToken,
        command: &str,
    ) -> Result<CommandOutput, ShellError> {
        self.device(id, |d| {
            d.history.push((Instant::now(), command.to_string()));
            match d.take_failure(command) {
                Some(FailureKind::Exit) => Ok(CommandOutput::failed(1, BUSY)),
                Some(FailureKind::Transport) => {
                    session.cancel();
                    Err(ShellError::Transport("connection reset by peer".into()))
                }
                None => Ok(d.apply(command)),
            }
        })
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn connect(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Arc<dyn ShellSession>, ShellError> {
        let rejected = self.device(&device.id, |d| {
            d.connects += 1;
            if d.connect_failures > 0 {
                d.connect_failures -= 1;
                true
            } else {
                false
            }
        });

        let delay = self.inner.lock().unwrap().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if rejected {
            return Err(ShellError::Connect("authentication failed".into()));
        }

        let closed = CancellationToken::new();
        self.device(&device.id, |d| d.sessions.push(closed.clone()));
        tracing::debug!("Mock session opened to {}", device.id);

        Ok(Arc::new(MockSession {
            id: device.id.clone(),
            shell: self.clone(),
            closed,
        }))
    }
}

/// Session to one simulated radio
pub struct MockSession {
    id: DeviceId,
    shell: MockShell,
    closed: CancellationToken,
}

#[async_trait]
impl ShellSession for MockSession {
    async fn execute(&self, command: &str) -> Result<CommandOutput, ShellError> {
        if self.closed.is_cancelled() {
            return Err(ShellError::Transport("session closed".into()));
        }
        self.shell.execute_on(&self.id, &self.closed, command)
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}
