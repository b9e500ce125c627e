//! Error handling for the CryptoNote mining client
//!
//! Error types covering daemon communication, template handling and mining
//! tasks, with helpers that tell the orchestrator which failures are
//! transient and which end the run.

use thiserror::Error;

/// Result type alias for mining operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mining client
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request errors that are not connection failures
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The daemon could not be reached (connection refused or timed out)
    #[error("Daemon unreachable: {message}")]
    Unreachable { message: String },

    /// The daemon answered, but with something we cannot use
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Binary block encoding errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A mined block was rejected or could not be delivered
    #[error("Couldn't submit block {block_hash}: {reason}")]
    SubmissionFailed { block_hash: String, reason: String },

    /// Worker errors
    #[error("Worker error: {worker_type}: {message}")]
    Worker { worker_type: String, message: String },

    /// Cancellation of a background task
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unreachable-daemon error
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a submission failure
    pub fn submission_failed(block_hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubmissionFailed {
            block_hash: block_hash.into(),
            reason: reason.into(),
        }
    }

    /// Create a worker error
    pub fn worker(worker_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worker {
            worker_type: worker_type.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Classify a transport error from reqwest.
    ///
    /// Connection and timeout failures mean the daemon is unreachable; every
    /// other transport failure is kept as an HTTP error.
    pub fn from_transport(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() {
            Self::unreachable(error.to_string())
        } else {
            Self::Http(error)
        }
    }

    /// Check if the daemon could not be reached
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::Unreachable { .. })
    }

    /// Check if this is a cooperative cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Config { .. } => "config",
            Error::Unreachable { .. } => "unreachable",
            Error::Protocol { .. } => "protocol",
            Error::Serialization { .. } => "serialization",
            Error::SubmissionFailed { .. } => "submission_failed",
            Error::Worker { .. } => "worker",
            Error::Cancelled { .. } => "cancelled",
            Error::InvalidState { .. } => "invalid_state",
        }
    }

    /// Process exit status for a run that ended with this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config { .. } | Error::Yaml(_) => 2,
            Error::Unreachable { .. } => 3,
            Error::Protocol { .. } | Error::Serialization { .. } | Error::Json(_) => 4,
            _ => 1,
        }
    }
}
