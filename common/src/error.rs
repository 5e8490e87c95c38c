//! Error types for RateFeed.

use thiserror::Error;

/// Main error type for RateFeed operations.
#[derive(Error, Debug)]
pub enum RateFeedError {
    /// Both the primary source and its fallback failed, or produced invalid values.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Caller-supplied parameter out of bounds.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Every cache tier was exhausted on read.
    #[error("Rates unavailable: {0}")]
    Unavailable(String),

    /// Persistent store I/O failure.
    #[error("Storage error: {0}")]
    TransientStorage(String),

    /// Upstream HTTP failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RateFeedError {
    /// Create a validation error for the given field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        RateFeedError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RateFeedError::Extraction(_)
                | RateFeedError::Unavailable(_)
                | RateFeedError::TransientStorage(_)
                | RateFeedError::Transport(_)
        )
    }

    /// Get a stable error code for logs and API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            RateFeedError::Extraction(_) => "EXTRACTION_FAILED",
            RateFeedError::Validation { .. } => "VALIDATION_FAILED",
            RateFeedError::Unavailable(_) => "UNAVAILABLE",
            RateFeedError::TransientStorage(_) => "STORAGE_ERROR",
            RateFeedError::Transport(_) => "TRANSPORT_ERROR",
            RateFeedError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for RateFeedError {
    fn from(err: serde_json::Error) -> Self {
        RateFeedError::TransientStorage(format!("serialization: {}", err))
    }
}

/// Result type alias for RateFeed operations.
pub type Result<T> = std::result::Result<T, RateFeedError>;
