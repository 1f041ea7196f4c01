//! Error types for the flagsync core
//!
//! This module defines all error types used throughout the crate.
//!
//! [`Error`] is `Clone` because a single initialization outcome is fanned out
//! to every caller attached to the same in-flight attempt.

use thiserror::Error;

use crate::context::ContextError;

/// Result type alias for flagsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the flagsync system
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The provider was shut down; this instance can never be initialized again
    #[error("cannot initialize provider after shutdown: create a new provider instance")]
    AlreadyShutdown,

    /// The caller's context fired before the flag client became ready
    #[error("initialization canceled: {cause}")]
    InitCancelled {
        /// Why the caller's context fired
        cause: ContextError,
    },

    /// The flag client did not become ready within its own bound
    #[error("flag client failed to become ready within {timeout_secs} seconds: {reason}")]
    InitTimedOut {
        /// Configured readiness timeout
        timeout_secs: u64,
        /// Failure reported by the client
        reason: String,
    },

    /// Initialization failed for a reason other than timeout or cancellation
    #[error("initialization failed: {0}")]
    InitFailed(String),

    /// Shutdown began while the readiness wait was in flight
    #[error("provider was shut down during initialization")]
    ShutdownDuringInit,

    /// Shutdown is logically complete but cleanup is still settling
    #[error("shutdown cleanup incomplete: {cause}")]
    ShutdownDeadlineExceeded {
        /// Why the caller's context fired
        cause: ContextError,
    },

    /// The provider is not ready to serve evaluations
    #[error("provider not ready")]
    NotReady,

    /// The evaluation context was already canceled or expired
    #[error("{0}")]
    Cancelled(ContextError),

    /// The evaluation context carries no targeting key
    #[error("targeting key missing")]
    TargetingKeyMissing,

    /// The evaluation context is malformed
    #[error("invalid evaluation context: {0}")]
    InvalidContext(String),

    /// The flag does not exist or evaluated to the control treatment
    #[error("flag not found: {0}")]
    FlagNotFound(String),

    /// A background task panicked; the panic was contained
    #[error("recovered from panic: {0}")]
    PanicRecovered(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Flag client construction or operation errors
    #[error("Flag client error: {0}")]
    Client(String),

    /// I/O errors (flag files)
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a flag client error
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// Create an initialization failure
    pub fn init_failed(msg: impl Into<String>) -> Self {
        Self::InitFailed(msg.into())
    }

    /// Create an invalid evaluation context error
    pub fn invalid_context(msg: impl Into<String>) -> Self {
        Self::InvalidContext(msg.into())
    }

    /// Create a "flag not found" error
    pub fn flag_not_found(flag: impl Into<String>) -> Self {
        Self::FlagNotFound(flag.into())
    }

    /// Whether retrying the same call on the same provider may succeed.
    ///
    /// `AlreadyShutdown` and `ShutdownDuringInit` are permanent for the
    /// instance; cancellation, client timeouts and evaluation-time readiness
    /// are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InitCancelled { .. } | Self::InitTimedOut { .. } | Self::NotReady
        )
    }

    /// Whether this error came from a caller-side context firing
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::InitCancelled { .. } | Self::ShutdownDeadlineExceeded { .. } | Self::Cancelled(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
