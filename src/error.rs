//! Error types for Flotilla

use thiserror::Error;

/// Result type for Flotilla operations
pub type Result<T> = std::result::Result<T, FlotillaError>;

/// Flotilla error types
#[derive(Error, Debug)]
pub enum FlotillaError {
    /// Connection failure or non-zero remote exit; only the message differs
    #[error("Remote command failed on {host}: {message}")]
    Remote { host: String, message: String },

    #[error("Nothing to do: {0}")]
    NothingToDo(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("Swarm error: {0}")]
    Swarm(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Missing file: {0}")]
    MissingFile(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed on {failed} of {total} node(s)")]
    PartialFailure { failed: usize, total: usize },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_yaml::Error> for FlotillaError {
    fn from(e: serde_yaml::Error) -> Self {
        FlotillaError::Yaml(e.to_string())
    }
}

impl FlotillaError {
    /// Shorthand for a remote failure on `host`
    pub fn remote(host: &str, message: impl Into<String>) -> Self {
        FlotillaError::Remote {
            host: host.to_string(),
            message: message.into(),
        }
    }
}
