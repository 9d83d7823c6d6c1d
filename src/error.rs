//! Library error type.
//!
//! Every fallible operation of the engine returns [`RagError`]. The HTTP
//! layer maps each kind to a status code; the CLI wraps it in `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Unknown document, conversation, or missing source path.
    #[error("{0}")]
    NotFound(String),

    /// An embedding or completion provider failed after retries, or
    /// returned a response that could not be used.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Invalid or inconsistent configuration, including a vector dimension
    /// that disagrees with the store.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller input failed validation.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RagError {
    pub fn not_found(message: impl Into<String>) -> Self {
        RagError::NotFound(message.into())
    }

    pub fn external(message: impl Into<String>) -> Self {
        RagError::ExternalService(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        RagError::Configuration(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        RagError::InvalidRequest(message.into())
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::NotFound(_) => "not_found",
            RagError::InvalidRequest(_) => "bad_request",
            RagError::ExternalService(_) => "external_service",
            RagError::Configuration(_) => "configuration",
            RagError::Database(_) | RagError::Io(_) | RagError::Internal(_) => "internal",
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
