//! SSH transport to the radios
//!
//! Each session is one authenticated SSH connection; every command runs on
//! its own exec channel over it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tokio_util::sync::CancellationToken;

use rf_core::config::{DeviceDescriptor, SshConfig};
use rf_core::traits::{CommandOutput, RemoteShell, ShellSession};
use rf_core::ShellError;

/// How often a session checks whether its connection is still up
const LIVENESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Extended data stream carrying stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Opens password-authenticated SSH sessions
pub struct SshShell {
    config: SshConfig,
    client: Arc<Config>,
}

impl SshShell {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            client: Arc::new(Config::default()),
        }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn connect(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Arc<dyn ShellSession>, ShellError> {
        let address = device.socket_address(self.config.port);
        tracing::debug!("Connecting to {} at {}", device.id, address);

        let mut handle = client::connect(Arc::clone(&self.client), address.as_str(), ClientHandler)
            .await
            .map_err(|e| ShellError::Connect(format!("{}: {}", address, e)))?;

        tracing::debug!("Authenticating to {} as '{}'", device.id, self.config.username);
        let authenticated = handle
            .authenticate_password(&self.config.username, &self.config.password)
            .await
            .map_err(|e| ShellError::Connect(format!("authentication error: {}", e)))?;

        if !authenticated {
            return Err(ShellError::Connect(format!(
                "authentication rejected for user '{}'",
                self.config.username
            )));
        }

        Ok(Arc::new(SshSession::new(handle)))
    }
}

/// An authenticated SSH connection to one radio
pub struct SshSession {
    handle: Arc<Handle<ClientHandler>>,
    closed: CancellationToken,
}

impl SshSession {
    fn new(handle: Handle<ClientHandler>) -> Self {
        let handle = Arc::new(handle);
        let closed = CancellationToken::new();
        spawn_liveness_watch(Arc::clone(&handle), closed.clone());
        Self { handle, closed }
    }

    fn transport_error(&self, context: &str, e: russh::Error) -> ShellError {
        if self.handle.is_closed() {
            self.closed.cancel();
        }
        ShellError::Transport(format!("{}: {}", context, e))
    }
}

/// Cancel `closed` once the connection drops
fn spawn_liveness_watch(handle: Arc<Handle<ClientHandler>>, closed: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIVENESS_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if handle.is_closed() {
                        tracing::debug!("SSH connection closed by peer");
                        closed.cancel();
                        break;
                    }
                }
                _ = closed.cancelled() => break,
            }
        }
    });
}

#[async_trait]
impl ShellSession for SshSession {
    async fn execute(&self, command: &str) -> Result<CommandOutput, ShellError> {
        if self.closed.is_cancelled() {
            return Err(ShellError::Transport("session closed".into()));
        }

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.transport_error("failed to open channel", e))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| self.transport_error("failed to exec", e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                _ => {}
            }
        }

        let exit_code = exit_code.ok_or_else(|| {
            if self.handle.is_closed() {
                self.closed.cancel();
            }
            ShellError::Transport("channel closed without exit status".into())
        })?;

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
        {
            tracing::debug!("SSH disconnect failed: {}", e);
        }
        self.closed.cancel();
    }
}

/// Client-side handler; the radios are on a closed bench network and
/// present throwaway host keys, so every key is accepted
pub struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Server host key: {}", server_public_key.fingerprint());
        Ok(true)
    }
}
