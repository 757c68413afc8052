//! Error types for the RAG gateway.

use thiserror::Error;

/// Error type OpenSearch reports when an index is created twice.
pub const ALREADY_EXISTS_ERROR: &str = "resource_already_exists_exception";

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur in the RAG gateway.
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing or invalid configuration (API keys, credentials, endpoints).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store confirmed that the resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A remote service answered with a non-success status.
    #[error("Upstream error (HTTP {status}): {message}")]
    Upstream {
        /// HTTP status returned by the service.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// HTTP/network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Content rejected by the moderation check.
    #[error("Content rejected by moderation: {0}")]
    Moderation(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RagError {
    /// Build an upstream error from a status and message.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        RagError::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Check if an error is transient and worth retrying.
    ///
    /// Network failures, rate limiting and server-side errors are retryable.
    /// Everything else is returned to the caller as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::Network(_) => true,
            RagError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the store refused to create an index that already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            RagError::Upstream { status: 400, message }
                if message.contains(ALREADY_EXISTS_ERROR)
        )
    }
}

impl From<reqwest::Error> for RagError {
    fn from(e: reqwest::Error) -> Self {
        RagError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        RagError::Serialization(e.to_string())
    }
}
