//! Client-facing error type. Every variant carries an owned message so the
//! error stays `Clone`, which in-flight request coalescing in [`crate::Client`]
//! depends on (a `Shared` future's output must be `Clone`).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("job {0} not found")]
    NotFound(String),

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("persisted store error: {0}")]
    Store(String),

    #[error("unexpected server response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
