//! Core trait definitions

mod shell;

pub use shell::{CommandOutput, HostShell, RemoteShell, ShellSession};
