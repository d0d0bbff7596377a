//! Dispatch error types

use std::time::Duration;
use thiserror::Error;

/// Message recorded when a failure carries no usable description
pub const UNKNOWN_FAILURE_MESSAGE: &str = "An unknown error occurred";

/// Errors that can occur while handing a prompt to the backend
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Dispatch cancelled")]
    Cancelled,

    /// Failure with no recognizable shape
    #[error("An unknown error occurred")]
    Unknown,
}

impl DispatchError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Api { status, .. } => *status >= 500 || *status == 429,
            DispatchError::Network(_) => true,
            DispatchError::Timeout(_) => true,
            DispatchError::InvalidResponse(_) => false,
            DispatchError::Cancelled => false,
            DispatchError::Unknown => false,
        }
    }

    /// True for failures that carry no description of their own
    pub fn is_unknown(&self) -> bool {
        matches!(self, DispatchError::Unknown)
    }

    /// Human-readable text recorded as the session's last error
    pub fn user_message(&self) -> String {
        match self {
            DispatchError::Unknown => UNKNOWN_FAILURE_MESSAGE.to_string(),
            DispatchError::Api { status, message } if message.trim().is_empty() => format!("API error {}", status),
            other => other.to_string(),
        }
    }
}
