//! Error types for Hatch

use thiserror::Error;

/// Result type for Hatch operations
pub type Result<T> = std::result::Result<T, HatchError>;

/// Hatch error types
#[derive(Error, Debug)]
pub enum HatchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad exit code ({code})")]
    NonZeroExit { code: i64 },

    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HatchError {
    /// Whether the runtime reported the target as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, HatchError::NotFound(_))
    }
}
