use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single outbound request, classified for the retry policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// 404: terminal, never retried.
    #[error("resource not found (404)")]
    NotFound,
    /// 429: cooldown, then retry.
    #[error("rate limited (429)")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response body: {0}")]
    Decode(String),
    #[error("response carried no data")]
    EmptyPayload,
}

impl FetchError {
    /// Classify a response status. `None` for 2xx.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_success() {
            return None;
        }
        Some(match status {
            StatusCode::NOT_FOUND => FetchError::NotFound,
            StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
            other => FetchError::Status(other.as_u16()),
        })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}
