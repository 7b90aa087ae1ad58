//! Error types for deployd

use thiserror::Error;

/// Main error type for deployd
#[derive(Error, Debug)]
pub enum DeploydError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeploydError {
    fn from(err: anyhow::Error) -> Self {
        DeploydError::Internal(err.to_string())
    }
}

/// Errors returned by the deployment platform client.
///
/// Only `Transient` errors are retried, and only by the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("transient platform error: {0}")]
    Transient(String),

    #[error("permanent platform error: {0}")]
    Permanent(String),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: http::StatusCode, body: &str) -> Self {
        let message = format!("{}: {}", status, body);
        if status.is_server_error()
            || status == http::StatusCode::REQUEST_TIMEOUT
            || status == http::StatusCode::TOO_MANY_REQUESTS
        {
            PlatformError::Transient(message)
        } else {
            PlatformError::Permanent(message)
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            PlatformError::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            PlatformError::from_status(status, "")
        } else {
            PlatformError::Permanent(err.to_string())
        }
    }
}
