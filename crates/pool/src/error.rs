//! Error types for the page pool
use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the pool engine, its factory and the session.
///
/// Most of these never reach the caller of [`Session`](crate::Session):
/// the session turns them into diagnostics. They surface directly only
/// through the lower-level [`Pool`](crate::Pool) API and from `launch`.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// The resource source could not be started
    #[error("Launch failed: {reason}")]
    Launch {
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The source failed to mint a resource
    #[error("Creation failed: {reason}")]
    Creation {
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Closing a resource or shutting the source down failed
    #[error("Close failed for '{resource_id}': {reason}")]
    Close {
        /// The resource identifier (or `source` for the resource source)
        resource_id: String,
        /// The failure reason
        reason: String,
    },

    /// No resource became available within the acquire timeout
    #[error("Pool exhausted after {timeout_ms}ms: {active}/{max_size} in use, {waiters} waiting")]
    PoolExhausted {
        /// Number of borrowed resources when the wait gave up
        active: usize,
        /// Maximum pool size
        max_size: usize,
        /// Number of other callers still waiting
        waiters: usize,
        /// The acquire timeout in milliseconds
        timeout_ms: u64,
    },

    /// The pool is draining and no longer hands out resources
    #[error("Pool is draining")]
    Draining,

    /// `launch` was called on a running session
    #[error("Session is already launched")]
    AlreadyLaunched,
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a creation error without an underlying source
    pub fn creation<S: Into<String>>(reason: S) -> Self {
        Self::Creation {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a launch error without an underlying source
    pub fn launch<S: Into<String>>(reason: S) -> Self {
        Self::Launch {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a close error for the given resource
    pub fn close<I: Into<String>, S: Into<String>>(resource_id: I, reason: S) -> Self {
        Self::Close {
            resource_id: resource_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Creation { .. } | Self::PoolExhausted { .. } => true,
            Self::Configuration { .. }
            | Self::Launch { .. }
            | Self::Close { .. }
            | Self::Draining
            | Self::AlreadyLaunched => false,
        }
    }

    /// Get the resource ID associated with this error (if any)
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Self::Close { resource_id, .. } => Some(resource_id),
            _ => None,
        }
    }
}
