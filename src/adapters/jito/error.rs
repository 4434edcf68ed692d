//! Jito Error Types

use thiserror::Error;

use crate::ports::chain::ChainError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JitoError {
    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Block Engine error: {message} (code: {code})")]
    ApiError { code: i64, message: String },

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Request timed out")]
    Timeout,

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl JitoError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JitoError::HttpError(_) | JitoError::Timeout | JitoError::RateLimited)
    }
}

impl From<reqwest::Error> for JitoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            JitoError::Timeout
        } else {
            JitoError::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for JitoError {
    fn from(err: serde_json::Error) -> Self {
        JitoError::SerializationError(err.to_string())
    }
}

impl From<JitoError> for ChainError {
    fn from(err: JitoError) -> Self {
        match err {
            JitoError::RateLimited => ChainError::RateLimited,
            JitoError::Timeout => ChainError::Timeout,
            JitoError::HttpError(msg) => ChainError::Transport(msg),
            JitoError::InvalidBundle(msg) | JitoError::SerializationError(msg) => ChainError::InvalidParams(msg),
            JitoError::ApiError { message, .. } => ChainError::Rejected(message),
        }
    }
}
