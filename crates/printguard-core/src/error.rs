//! Error types shared across PrintGuard crates.

use thiserror::Error;

/// Result type for PrintGuard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the printer core.
#[derive(Debug, Error)]
pub enum Error {
    /// The targeted printer or command does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested state change is not legal from the current state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// A cached telemetry field could not be coerced to its expected type.
    #[error(
        "Stale telemetry for device {device_id}: field '{field}' has malformed value '{value}'"
    )]
    StaleData {
        device_id: String,
        field: String,
        value: String,
    },

    /// The record store is unavailable or rejected the write.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Record encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid caller input.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Short machine-readable code, used by the CLI and by API adapters.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidTransition(_) => "INVALID_TRANSITION",
            Error::StaleData { .. } => "STALE_DATA",
            Error::Persistence(_) => "PERSISTENCE_FAILURE",
            Error::Conflict(_) => "CONFLICT",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Configuration(_) => "CONFIGURATION",
            Error::Validation(_) => "VALIDATION",
        }
    }

    /// Whether the caller may retry the same request later.
    ///
    /// The core itself never retries; this only classifies the failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Persistence(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
