//! Error types
//!
//! None of these escape the scoring client or the interceptor: both convert
//! failures into fail-open results at their boundary.

use std::time::Duration;

/// Why a scoring call produced no score.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("invalid URL / unsupported scheme: {0}")]
    InvalidInput(String),
    #[error("scoring request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("network error: {0}")]
    Transport(String),
}

impl ScoreError {
    /// Short text for the `reason` field of a degraded result.
    pub fn reason(&self) -> String {
        match self {
            Self::InvalidInput(_) => "invalid URL / unsupported scheme".to_string(),
            Self::Timeout(_) => "Scoring service unreachable (timed out)".to_string(),
            Self::MalformedResponse(_) => "Malformed response from scoring service".to_string(),
            Self::Upstream { message, .. } => message.clone(),
            Self::Transport(_) => "Network error".to_string(),
        }
    }
}

/// Error type for persisted state.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("State file is not a JSON object: {0}")]
    NotAnObject(String),
}

/// Internal failure while evaluating a navigation. Always resolved to allow.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InterceptError {
    #[error("URL has no hostname: {0}")]
    MissingHost(String),
    #[error("Invalid warning page URL: {0}")]
    WarningPage(String),
}
