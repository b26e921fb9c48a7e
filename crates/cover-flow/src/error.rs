//! Error types for the orchestration domain.

/// The result type used throughout cover-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in orchestration operations.
///
/// Runner failures have their own type ([`crate::runner::RunnerError`]) because
/// they are recorded in the cached result rather than propagated.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A job key could not be decoded.
    #[error("invalid job key: {message}")]
    InvalidJobKey {
        /// Description of what made the key invalid.
        message: String,
    },

    /// The overflow queue subscription ended.
    #[error("overflow queue closed: {channel}")]
    QueueClosed {
        /// The channel that closed.
        channel: String,
    },

    /// The admission gate was closed while waiting for a token.
    #[error("admission gate closed")]
    GateClosed,

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The HTTP client used for repository lookups could not be built.
    #[error("failed to build HTTP client: {message}")]
    HttpClient {
        /// Description of the failure.
        message: String,
    },

    /// An error from cover-core.
    #[error("core error: {0}")]
    Core(#[from] cover_core::Error),
}

impl Error {
    /// Creates a new invalid job key error.
    #[must_use]
    pub fn invalid_job_key(message: impl Into<String>) -> Self {
        Self::InvalidJobKey {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            message: value.to_string(),
        }
    }
}
