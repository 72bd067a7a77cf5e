//! Remote command execution over SSH
//!
//! [`RemoteExecutor`] is the transport seam: it runs one command on one host
//! and hands back the output. [`Remote`] sits on top of an executor and a set
//! of credentials and takes care of step titles, sudo and log masking, so
//! every executor gets the same logging behaviour.

pub mod command;
pub mod ssh;
pub mod wait;

pub use command::{RemoteCommand, MASKED};
pub use ssh::SshExecutor;
pub use wait::wait_for_marker;

use crate::error::{FlotillaError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH credential
#[derive(Clone)]
pub enum Credential {
    /// Password authentication, used for first contact before keys exist
    Password(String),
    /// Private key authentication
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => write!(f, "Password({})", MASKED),
            Credential::PrivateKey { path, .. } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

/// Who to log in as and how
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Remote user name
    pub user: String,
    /// SSH port
    pub port: u16,
    /// Credential
    pub credential: Credential,
}

impl AuthConfig {
    /// Password login as `user`
    pub fn password(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            port: DEFAULT_SSH_PORT,
            credential: Credential::Password(password.to_string()),
        }
    }

    /// Key login as `user`
    pub fn private_key(user: &str, path: PathBuf, passphrase: Option<String>) -> Self {
        Self {
            user: user.to_string(),
            port: DEFAULT_SSH_PORT,
            credential: Credential::PrivateKey { path, passphrase },
        }
    }

    /// Use a non-default SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Runs a single command on a single host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute `command` on `host` and return its trimmed stdout.
    ///
    /// Connection failures and non-zero exits both come back as
    /// [`FlotillaError::Remote`] carrying the captured stderr.
    async fn execute(&self, host: &str, auth: &AuthConfig, command: &RemoteCommand)
        -> Result<String>;
}

/// An executor bound to a set of credentials
#[derive(Clone)]
pub struct Remote {
    executor: Arc<dyn RemoteExecutor>,
    auth: AuthConfig,
}

impl Remote {
    /// Create a new remote
    pub fn new(executor: Arc<dyn RemoteExecutor>, auth: AuthConfig) -> Self {
        Self { executor, auth }
    }

    /// Same executor, different credentials
    pub fn with_auth(&self, auth: AuthConfig) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            auth,
        }
    }

    /// Remote user name
    pub fn user(&self) -> &str {
        &self.auth.user
    }

    /// Credentials in use
    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    fn prefixed(&self, host: &str, text: &str) -> String {
        format!("[{}@{}] {}", self.auth.user, host, text)
    }

    /// Execute a command, logging it with masking applied
    pub async fn exec(&self, host: &str, command: impl Into<RemoteCommand>) -> Result<String> {
        let command = command.into();

        if let Some(title) = &command.title {
            tracing::info!("{}: {}", host, title);
        }
        tracing::debug!("{}", self.prefixed(host, &command.display_input()));

        match self.executor.execute(host, &self.auth, &command).await {
            Ok(output) => {
                tracing::debug!(
                    "{}",
                    self.prefixed(host, &format!("success: {}", command.display_output(&output)))
                );
                Ok(output)
            }
            Err(e) => {
                let e = if command.mask_output {
                    FlotillaError::remote(host, format!("command failed, output {}", MASKED))
                } else {
                    e
                };
                tracing::debug!("{}", self.prefixed(host, &format!("failed: {}", e)));
                Err(e)
            }
        }
    }

    /// Execute commands in order, stopping at the first failure
    pub async fn exec_all(&self, host: &str, commands: &[RemoteCommand]) -> Result<()> {
        for command in commands {
            self.exec(host, command.clone()).await?;
        }
        Ok(())
    }

    /// Execute a command and terminate the process if it fails.
    ///
    /// Only for single-target top-level commands. Fan-out workers must use
    /// [`Remote::exec`] so a failing node cannot take its siblings down.
    pub async fn exec_or_exit(&self, host: &str, command: impl Into<RemoteCommand>) -> String {
        match self.exec(host, command).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    }
}
