//! SSH transport built on russh

use super::{AuthConfig, Credential, RemoteCommand, RemoteExecutor};
use crate::error::{FlotillaError, Result};
use async_trait::async_trait;
use russh::client;
use russh_keys::key::{KeyPair, PublicKey};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client handler. Host keys are not verified.
struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // TODO: check against ~/.ssh/known_hosts once key pinning is configurable
        Ok(true)
    }
}

/// Executes each command over a fresh SSH connection
#[derive(Debug, Clone)]
pub struct SshExecutor {
    /// TCP connect timeout
    connect_timeout: Duration,
    /// Idle timeout for an established connection
    inactivity_timeout: Option<Duration>,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            inactivity_timeout: None,
        }
    }
}

impl SshExecutor {
    /// Create a new executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Drop connections that stay idle for longer than `timeout`
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    async fn connect(&self, host: &str, auth: &AuthConfig) -> Result<client::Handle<ClientHandler>> {
        let config = Arc::new(client::Config {
            inactivity_timeout: self.inactivity_timeout,
            ..Default::default()
        });

        let addr = (host.to_string(), auth.port);
        let mut session = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, addr, ClientHandler),
        )
        .await
        .map_err(|_| {
            FlotillaError::remote(
                host,
                format!("connection timed out after {:?}", self.connect_timeout),
            )
        })?
        .map_err(|e| FlotillaError::remote(host, format!("connection failed: {}", e)))?;

        let authenticated = match &auth.credential {
            Credential::Password(password) => session
                .authenticate_password(auth.user.as_str(), password.as_str())
                .await
                .map_err(|e| FlotillaError::remote(host, e.to_string()))?,
            Credential::PrivateKey { path, passphrase } => {
                let key = load_key(host, path, passphrase.as_deref())?;
                session
                    .authenticate_publickey(auth.user.as_str(), Arc::new(key))
                    .await
                    .map_err(|e| FlotillaError::remote(host, e.to_string()))?
            }
        };

        if !authenticated {
            return Err(FlotillaError::remote(
                host,
                format!("authentication failed for user '{}'", auth.user),
            ));
        }

        Ok(session)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        host: &str,
        auth: &AuthConfig,
        command: &RemoteCommand,
    ) -> Result<String> {
        let session = self.connect(host, auth).await?;

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| FlotillaError::remote(host, e.to_string()))?;
        channel
            .exec(true, command.shell().as_bytes())
            .await
            .map_err(|e| FlotillaError::remote(host, e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                russh::ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                russh::ChannelMsg::ExtendedData { data, ext } if ext == 1 => {
                    stderr.extend_from_slice(&data)
                }
                russh::ChannelMsg::ExitStatus { exit_status: status } => {
                    exit_status = Some(status)
                }
                russh::ChannelMsg::Close => break,
                _ => {}
            }
        }

        if let Err(e) = session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::trace!("{}: disconnect failed: {}", host, e);
        }

        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);
        check_exit(host, exit_status, &stdout, &stderr)
    }
}

/// Load the private key, attributing failures to `host`
fn load_key(host: &str, path: &Path, passphrase: Option<&str>) -> Result<KeyPair> {
    russh_keys::load_secret_key(path, passphrase).map_err(|e| {
        FlotillaError::remote(
            host,
            format!("failed to load private key {}: {}", path.display(), e),
        )
    })
}

/// Turn a finished channel into output or an error
fn check_exit(host: &str, exit_status: Option<u32>, stdout: &str, stderr: &str) -> Result<String> {
    match exit_status {
        Some(0) => Ok(stdout.trim_end_matches(['\r', '\n']).to_string()),
        Some(code) => {
            let mut message = format!("exit status {}", code);
            if !stderr.trim().is_empty() {
                message.push_str(" / ");
                message.push_str(stderr.trim());
            }
            Err(FlotillaError::remote(host, message))
        }
        None => Err(FlotillaError::remote(
            host,
            "channel closed without an exit status",
        )),
    }
}
