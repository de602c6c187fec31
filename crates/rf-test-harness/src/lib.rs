//! rf-test-harness: Mock shells for rf-fleet
//!
//! [`MockShell`] stands in for the SSH transport and simulates each radio as
//! a small attribute filesystem plus a bank of discrete lines. [`MockHost`]
//! stands in for the controller host's shell. Both record every command and
//! can be scripted to fail.

pub mod mock_host;
pub mod mock_shell;

pub use mock_host::MockHost;
pub use mock_shell::{MockSession, MockShell};

/// stderr used for scripted command failures
pub const BUSY: &str = "Device or resource busy";

/// Parsed form of the command shapes the controller emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Read { path: String },
    Write { path: String, value: String },
    Line { line: u32, high: bool },
    Other,
}

impl ParsedCommand {
    pub fn parse(command: &str) -> Self {
        let command = command.trim();
        if let Some(path) = command.strip_prefix("cat ") {
            return ParsedCommand::Read {
                path: path.trim().to_string(),
            };
        }
        if let Some(rest) = command.strip_prefix("echo ") {
            if let Some((value, path)) = rest.split_once(" > ") {
                return ParsedCommand::Write {
                    path: path.trim().to_string(),
                    value: value.trim().to_string(),
                };
            }
        }
        if let Some(rest) = command.strip_prefix("gpioset ") {
            let assignment = rest.split_whitespace().last().unwrap_or("");
            if let Some((line, value)) = assignment.split_once('=') {
                if let Ok(line) = line.parse() {
                    return ParsedCommand::Line {
                        line,
                        high: value == "1",
                    };
                }
            }
        }
        ParsedCommand::Other
    }
}
