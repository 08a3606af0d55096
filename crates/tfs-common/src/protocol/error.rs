use std::sync::Arc;

use hyper::HeaderMap;
use thiserror::Error;

/// Maximum number of response body bytes kept on a [`TfsError::Request`].
pub const ERROR_BODY_LIMIT: usize = 1024;

#[derive(Error, Debug)]
pub enum TfsError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Server pool is empty")]
    PoolEmpty,

    #[error("Transport error on {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Request timeout after {timeout_ms}ms on {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("TFS request error, Http status {status} on {url}")]
    Request {
        status: u16,
        url: String,
        headers: HeaderMap,
        body: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client closed before the request was dispatched")]
    Closed,

    #[error("Client bootstrap failed: {0}")]
    Bootstrap(Arc<TfsError>),
}

impl TfsError {
    /// Builds a [`TfsError::Request`], keeping at most [`ERROR_BODY_LIMIT`]
    /// bytes of the response body.
    pub fn request(status: u16, url: impl Into<String>, headers: HeaderMap, body: &[u8]) -> Self {
        let excerpt = &body[..body.len().min(ERROR_BODY_LIMIT)];
        TfsError::Request {
            status,
            url: url.into(),
            headers,
            body: String::from_utf8_lossy(excerpt).into_owned(),
        }
    }

    /// True for connect failures and timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(self, TfsError::Transport { .. } | TfsError::Timeout { .. })
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, TfsError::Parse(_))
    }

    /// HTTP status carried by a [`TfsError::Request`].
    pub fn status(&self) -> Option<u16> {
        match self {
            TfsError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Target URL for transport and request errors.
    pub fn url(&self) -> Option<&str> {
        match self {
            TfsError::Transport { url, .. }
            | TfsError::Timeout { url, .. }
            | TfsError::Request { url, .. } => Some(url),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TfsError {
    fn from(err: serde_json::Error) -> Self {
        TfsError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TfsError>;
