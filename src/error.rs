// Error types shared across the crate

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum CoreError {
    /// Registry lookup for a type nobody registered
    #[error("service not registered: {0}")]
    ServiceNotFound(&'static str),

    /// A signal value reached a channel declared for a different type
    #[error("signal type mismatch: channel carries {expected}, got {actual}")]
    SignalTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("state not registered: {0}")]
    StateNotRegistered(String),

    /// Transition requested before set_initial_state
    #[error("state machine '{0}' has no initial state")]
    NotInitialized(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
