//! Production shell transports
//!
//! - [`SshShell`]: password-authenticated SSH sessions to the radios
//! - [`ProcessShell`]: `sh -c` on the controller host

mod process;
mod ssh;

pub use process::ProcessShell;
pub use ssh::{SshSession, SshShell};
