//! rf-controller: Session and state synchronization for a radio fleet
//!
//! The controller keeps one remote shell session per radio, runs attribute
//! commands over it with retry and reconnection, and mirrors each radio's
//! tunables into an in-memory state record. Mode changes drive the shared
//! relay lines on the controller host; power cycling goes through the host's
//! USB hub.

pub mod commands;
pub mod executor;
pub mod fleet;
pub mod init;
pub mod mode;
pub mod power;
pub mod registry;
pub mod session;
pub mod shell;
pub mod state;
pub mod sync;

pub use fleet::{Fleet, Parameter, PowerTarget};
pub use state::{DeviceState, FleetReport, StateStore};
