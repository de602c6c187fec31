//! Mock controller-host shell.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use rf_core::traits::{CommandOutput, HostShell};
use rf_core::ShellError;

use crate::ParsedCommand;

#[derive(Default)]
struct Inner {
    history: Vec<String>,
    lines: HashMap<u32, bool>,
    failing: Vec<String>,
}

/// Mock [`HostShell`] recording relay and power commands
#[derive(Clone, Default)]
pub struct MockHost {
    inner: Arc<Mutex<Inner>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command containing `needle` exit 1
    pub fn fail_matching(&self, needle: &str) {
        self.inner.lock().unwrap().failing.push(needle.to_string());
    }

    /// Level last written to `line`
    pub fn line(&self, line: u32) -> Option<bool> {
        self.inner.lock().unwrap().lines.get(&line).copied()
    }

    pub fn commands(&self) -> Vec<String> {
        self.inner.lock().unwrap().history.clone()
    }
}

#[async_trait]
impl HostShell for MockHost {
    async fn run(&self, command: &str) -> Result<CommandOutput, ShellError> {
        let mut inner = self.inner.lock().unwrap();
        inner.history.push(command.to_string());

        if inner.failing.iter().any(|needle| command.contains(needle)) {
            return Ok(CommandOutput::failed(1, "gpioset: error setting the GPIO line values"));
        }

        if let ParsedCommand::Line { line, high } = ParsedCommand::parse(command) {
            inner.lines.insert(line, high);
        }
        Ok(CommandOutput::ok(""))
    }
}
