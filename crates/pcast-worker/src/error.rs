//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Vendor could not be reached or answered with a transient failure
    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    /// Vendor refused the request outright
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid story plan: {0}")]
    InvalidPlan(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Phase trigger failed: {0}")]
    TriggerFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Story not found: {0}")]
    StoryNotFound(String),

    #[error("Registry error: {0}")]
    Registry(#[from] pcast_registry::RegistryError),

    #[error("Storage error: {0}")]
    Storage(#[from] pcast_storage::StorageError),

    #[error("Event error: {0}")]
    Events(#[from] pcast_events::EventError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn dispatch_failed(msg: impl Into<String>) -> Self {
        Self::DispatchFailed(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn trigger_failed(msg: impl Into<String>) -> Self {
        Self::TriggerFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::DispatchFailed(_) | WorkerError::UploadFailed(_) => true,
            WorkerError::Registry(e) => e.is_retryable(),
            WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(WorkerError::dispatch_failed("503").is_retryable());
        assert!(!WorkerError::rejected("content policy").is_retryable());
        assert!(!WorkerError::config_error("bad rate").is_retryable());
        assert!(!WorkerError::from(pcast_registry::RegistryError::not_found("job x")).is_retryable());
    }
}
