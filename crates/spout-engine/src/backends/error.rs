//! Backend failure taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Transport, authentication or provider-side failure during a completion.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("missing credentials: {0} is not set")]
    MissingCredentials(&'static str),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("model not available: {0}")]
    ModelNotAvailable(String),
    #[error("server error (http {status}): {body}")]
    Server { status: u16, body: String },
    #[error("unexpected http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("prediction {status}: {detail}")]
    PredictionFailed { status: String, detail: String },
}

impl BackendError {
    /// Classify a non-success HTTP response.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let body = body.trim().to_string();
        match status {
            401 | 403 => Self::Authentication(body),
            429 => Self::RateLimited(body),
            400 | 422 => Self::InvalidRequest(body),
            404 => Self::ModelNotAvailable(body),
            500..=599 => Self::Server { status, body },
            _ => Self::Http { status, body },
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Server { .. } | Self::Network(_) | Self::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}
