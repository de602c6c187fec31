//! Session management

mod pool;

pub use pool::{PooledSession, SessionPool};
