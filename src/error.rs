//! Error types for calls to the remote collaborators.

use thiserror::Error;

/// Failure of a call to the assistant gateway or the document index.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// The remote side answered with a non-success status.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// The request never produced a response (connect, timeout, body read).
    #[error("Request error: {0}")]
    Transport(String),

    /// A success response whose body could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Rejected locally before any remote call was made.
    #[error("{0}")]
    Validation(String),
}

/// Turns use the same taxonomy as index calls.
pub type GatewayError = IndexError;

impl IndexError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::Api { status: 404, .. })
    }

    /// HTTP status to report when relaying this error to a caller.
    pub fn status(&self) -> u16 {
        match self {
            IndexError::Api { status, .. } => *status,
            IndexError::Validation(_) => 400,
            IndexError::Transport(_) | IndexError::InvalidResponse(_) => 500,
        }
    }

    /// Builds an [`IndexError::Api`] from a non-success response body.
    ///
    /// Prefers `error.message` (OpenAI shape), then a flat `error` string
    /// (gateway shape), then the raw body, then the status line.
    pub fn from_body(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .or_else(|| v.get("error").and_then(|m| m.as_str()))
            })
            .map(str::to_string)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    format!("HTTP error {}", status)
                } else {
                    trimmed.to_string()
                }
            });
        IndexError::Api { status, message }
    }
}

impl From<reqwest::Error> for IndexError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            IndexError::InvalidResponse(e.to_string())
        } else {
            IndexError::Transport(e.to_string())
        }
    }
}
