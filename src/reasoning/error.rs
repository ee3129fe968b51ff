//! Collaborator error types.

use std::time::Duration;

use thiserror::Error;

/// Failure talking to an external collaborator.
///
/// None of these ever mutate task state; callers log them and move on.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("collaborator returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid collaborator response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl CollaboratorError {
    /// Worth trying again on a later cycle without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            CollaboratorError::Timeout(_) | CollaboratorError::Network(_) => true,
            CollaboratorError::Http { status, .. } => {
                matches!(classify_http_status(*status), HttpErrorClass::Retryable)
            }
            CollaboratorError::InvalidResponse(_) | CollaboratorError::Other(_) => false,
        }
    }
}

/// Coarse HTTP status classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorClass {
    Retryable,
    Permanent,
}

pub fn classify_http_status(status: u16) -> HttpErrorClass {
    match status {
        408 | 425 | 429 => HttpErrorClass::Retryable,
        500..=599 => HttpErrorClass::Retryable,
        _ => HttpErrorClass::Permanent,
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CollaboratorError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            CollaboratorError::Network(format!("Connection failed: {}", e))
        } else if e.is_decode() {
            CollaboratorError::InvalidResponse(e.to_string())
        } else {
            CollaboratorError::Network(format!("Request failed: {}", e))
        }
    }
}
