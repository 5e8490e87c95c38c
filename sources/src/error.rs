//! Source error types.

use ratefeed_common::RateFeedError;
use thiserror::Error;

/// Errors raised while talking to, or making sense of, an upstream origin.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The request never produced a response (connect failure, timeout).
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The origin answered with a non-success status.
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The body could not be decoded.
    #[error("Malformed response: {0}")]
    Decode(String),

    /// The body was decoded but carried no usable rate.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Caller-supplied parameter out of bounds.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },
}

impl SourceError {
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        SourceError::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

impl From<SourceError> for RateFeedError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Validation { field, message } => RateFeedError::Validation { field, message },
            SourceError::Transport { .. } | SourceError::Status { .. } => {
                RateFeedError::Transport(err.to_string())
            }
            SourceError::Decode(_) | SourceError::Extraction(_) => {
                RateFeedError::Extraction(err.to_string())
            }
        }
    }
}

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;
