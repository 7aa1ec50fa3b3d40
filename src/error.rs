//! Error types for the build-artifact cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the build-artifact cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Service Boundary Errors
    // =========================================================================
    /// Substrate connection or configuration failure during `init`
    #[error("Startup failed: {0}")]
    Startup(String),

    /// A `put_data` call could not be committed
    #[error("Write failed: {0}")]
    Write(String),

    /// `put_data` was called without any keys
    #[error("Key set must not be empty")]
    EmptyKeySet,

    /// Operation attempted before `init`
    #[error("Cache service is not initialized")]
    NotInitialized,

    /// `init` attempted a second time
    #[error("Cache service is already initialized")]
    AlreadyInitialized,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed human-readable size string
    #[error("Failed to parse size: {0}")]
    SizeParse(String),

    /// YAML configuration could not be decoded
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// DNS discovery failed; callers fall back to the last good address set
    #[error("Discovery degraded for {lookup}: {reason}")]
    DiscoveryDegraded { lookup: String, reason: String },

    // =========================================================================
    // Substrate Errors
    // =========================================================================
    /// Clustered map operation failed
    #[error("Substrate error: {0}")]
    Substrate(String),

    /// Cluster-wide sequence could not reserve a block
    #[error("Sequence unavailable: {0}")]
    SequenceUnavailable(String),

    /// A cascade cleanup step failed and should be retried
    #[error("Cascade cleanup for artifact {id} failed: {reason}")]
    Cascade { id: u64, reason: String },

    // =========================================================================
    // Misc
    // =========================================================================
    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Substrate(_)
                | Error::SequenceUnavailable(_)
                | Error::Cascade { .. }
                | Error::Io(_)
        )
    }

    /// Wrap a lower-level failure as a write failure for the service boundary.
    pub(crate) fn into_write(self) -> Error {
        match self {
            e @ (Error::Write(_) | Error::EmptyKeySet | Error::NotInitialized) => e,
            other => Error::Write(other.to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
