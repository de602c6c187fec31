//! Per-device session pool
//!
//! Each device has one slot holding at most one live session and at most one
//! in-flight handshake. Concurrent callers that arrive while a handshake is
//! running all await the same shared future, so a device never sees two
//! simultaneous logins from the controller.
//!
//! # Generations
//!
//! Every slot carries a generation counter that is bumped whenever its
//! session is discarded. Sessions, close watchers and invalidation requests
//! all remember the generation they belong to, and only act if it is still
//! current. A watcher for an old session can therefore never tear down its
//! replacement.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use rf_core::config::DeviceDescriptor;
use rf_core::traits::{CommandOutput, RemoteShell, ShellSession};
use rf_core::{DeviceId, FleetError, ShellError};

use crate::registry::DeviceRegistry;
use crate::state::{DeviceState, StateStore};

type Handshake = Shared<BoxFuture<'static, Result<PooledSession, FleetError>>>;

/// A live session together with the slot generation it was created in
#[derive(Clone)]
pub struct PooledSession {
    pub session: Arc<dyn ShellSession>,
    pub generation: u64,
}

impl PooledSession {
    pub async fn execute(&self, command: &str) -> Result<CommandOutput, ShellError> {
        self.session.execute(command).await
    }
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Slot {
    session: Option<PooledSession>,
    pending: Option<Handshake>,
    generation: u64,
}

impl Slot {
    /// Forget the session and any handshake, and move to a new generation
    fn end(&mut self) -> Option<PooledSession> {
        self.pending = None;
        self.generation += 1;
        self.session.take()
    }
}

/// Owns the remote sessions for every device
pub struct SessionPool {
    shell: Arc<dyn RemoteShell>,
    registry: Arc<DeviceRegistry>,
    store: Arc<StateStore>,
    connect_timeout: Duration,
    slots: DashMap<DeviceId, Slot>,
}

impl SessionPool {
    pub fn new(
        shell: Arc<dyn RemoteShell>,
        registry: Arc<DeviceRegistry>,
        store: Arc<StateStore>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            shell,
            registry,
            store,
            connect_timeout,
            slots: DashMap::new(),
        }
    }

    /// Get the device's session, opening one if needed.
    ///
    /// Returns the cached session while it is alive. If a handshake is
    /// already running, waits for that handshake instead of starting another.
    /// Never retries; a failed handshake is reported to every waiter as
    /// [`FleetError::ConnectFailure`].
    pub async fn acquire(self: &Arc<Self>, id: &DeviceId) -> Result<PooledSession, FleetError> {
        let descriptor = self.registry.get(id)?;

        let (handshake, ended) = {
            let mut slot = self.slots.entry(id.clone()).or_default();
            let mut ended = false;

            if let Some(current) = &slot.session {
                if !current.session.closed().is_cancelled() {
                    return Ok(current.clone());
                }
                slot.end();
                ended = true;
            }

            let handshake = match &slot.pending {
                Some(pending) => pending.clone(),
                None => {
                    let handshake = Arc::clone(self)
                        .establish(descriptor, slot.generation)
                        .boxed()
                        .shared();
                    slot.pending = Some(handshake.clone());
                    handshake
                }
            };
            (handshake, ended)
        };

        if ended {
            tracing::info!("Session to {} was closed, reconnecting", id);
            self.store.update(id, DeviceState::mark_disconnected);
        }

        handshake.await
    }

    /// Discard the session a failed command ran on.
    ///
    /// Does nothing if the slot has already moved past `generation`, so a
    /// stale failure cannot close a session another caller just opened.
    pub async fn invalidate(&self, id: &DeviceId, generation: u64) {
        let discarded = self
            .with_slot(id, generation, |slot| {
                if slot.session.is_some() {
                    slot.end()
                } else {
                    None
                }
            })
            .flatten();

        if let Some(pooled) = discarded {
            tracing::debug!("Discarding session to {} (generation {})", id, generation);
            pooled.session.close().await;
        }
    }

    /// Drop the session and any pending handshake, and mark the device
    /// disconnected and uninitialized.
    pub async fn reset(&self, id: &DeviceId) {
        let discarded = self.slots.get_mut(id).and_then(|mut slot| slot.end());
        self.store.update(id, DeviceState::mark_disconnected);

        if let Some(pooled) = discarded {
            tracing::info!("Closing session to {}", id);
            pooled.session.close().await;
        }
    }

    /// Close every session, for shutdown
    pub async fn close_all(&self) {
        let sessions: Vec<(DeviceId, PooledSession)> = self
            .slots
            .iter_mut()
            .filter_map(|mut entry| {
                let id = entry.key().clone();
                entry.value_mut().end().map(|s| (id, s))
            })
            .collect();

        for (id, pooled) in sessions {
            self.store.update(&id, DeviceState::mark_disconnected);
            pooled.session.close().await;
        }
    }

    /// Whether a live session is cached for the device
    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.slots
            .get(id)
            .and_then(|slot| slot.session.as_ref().map(|s| !s.session.closed().is_cancelled()))
            .unwrap_or(false)
    }

    async fn establish(
        self: Arc<Self>,
        descriptor: Arc<DeviceDescriptor>,
        generation: u64,
    ) -> Result<PooledSession, FleetError> {
        let id = descriptor.id.clone();
        tracing::debug!("Opening session to {} at {}", id, descriptor.address);

        let outcome =
            match tokio::time::timeout(self.connect_timeout, self.shell.connect(&descriptor)).await
            {
                Ok(Ok(session)) => Ok(session),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "handshake timed out after {:?}",
                    self.connect_timeout
                )),
            };

        let session = match outcome {
            Ok(session) => session,
            Err(reason) => {
                self.with_slot(&id, generation, |slot| slot.pending = None);
                let error = FleetError::ConnectFailure {
                    device: id.clone(),
                    reason,
                };
                self.store.update(&id, |s| {
                    s.connected = false;
                    s.error = Some(error.to_string());
                });
                tracing::warn!("{}", error);
                return Err(error);
            }
        };

        let pooled = PooledSession {
            session,
            generation,
        };
        let stored = self
            .with_slot(&id, generation, |slot| {
                slot.pending = None;
                slot.session = Some(pooled.clone());
            })
            .is_some();

        if !stored {
            // The slot was reset while the handshake was running.
            pooled.session.close().await;
            return Err(FleetError::ConnectFailure {
                device: id,
                reason: "session discarded during handshake".to_string(),
            });
        }

        self.store.update(&id, |s| {
            s.connected = true;
            s.error = None;
        });
        self.watch(&id, generation, pooled.session.closed());
        tracing::info!("Session established to {}", id);

        Ok(pooled)
    }

    /// Clear the slot once the session's close token fires
    fn watch(self: &Arc<Self>, id: &DeviceId, generation: u64, closed: CancellationToken) {
        let pool = Arc::downgrade(self);
        let id = id.clone();

        tokio::spawn(async move {
            closed.cancelled().await;
            if let Some(pool) = pool.upgrade() {
                pool.session_ended(&id, generation);
            }
        });
    }

    fn session_ended(&self, id: &DeviceId, generation: u64) {
        let ended = self
            .with_slot(id, generation, |slot| {
                slot.session.is_some() && slot.end().is_some()
            })
            .unwrap_or(false);

        if ended {
            tracing::info!("Session to {} ended", id);
            self.store.update(id, DeviceState::mark_disconnected);
        }
    }

    /// Run `f` on the slot only if it is still at `generation`
    fn with_slot<R>(
        &self,
        id: &DeviceId,
        generation: u64,
        f: impl FnOnce(&mut Slot) -> R,
    ) -> Option<R> {
        let mut slot = self.slots.get_mut(id)?;
        if slot.generation != generation {
            return None;
        }
        Some(f(slot.value_mut()))
    }
}
