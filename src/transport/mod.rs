//! Transport collaborators
//!
//! The engine never talks HTTP itself. It hands a [`RequestDescriptor`] to a
//! [`Transport`] and gets back either a raw [`TransportResponse`] or a
//! [`TransportError`] that says which kind of failure happened. The
//! [`RetryPolicy`](retry::RetryPolicy) decides what to do with that error.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde_json::json;

use crate::{Message, RequestDescriptor};

pub mod auth;
pub mod headers;
pub mod http;
pub mod retry;

pub use auth::BearerTransport;
pub use headers::{warning_header, RateLimitHeaders};
pub use http::{HttpSettings, HttpTransport};
pub use retry::{ErrorKind, RetryOutcome, RetryPolicy, StatusAction, StatusTable};

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No response at all (connect failure, reset, timeout)
    #[error("connection error: {0}")]
    Connection(String),

    /// Server answered with a non-success status
    #[error("HTTP status {status}: {body}")]
    Status {
        /// Status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// Body could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Request has no usable URL
    #[error("request URL is required")]
    UrlRequired,

    /// Authentication required but unavailable or rejected
    #[error("authentication required")]
    AuthRequired,
}

impl TransportError {
    /// Status code carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured form stored on a request record
    pub fn to_json(&self) -> Message {
        json!({
            "message": self.to_string(),
            "status": self.status(),
        })
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Raw response from a transport
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw body
    pub body: Bytes,
}

impl TransportResponse {
    /// Build a response
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Decode the body as JSON
    pub fn json(&self) -> TransportResult<Message> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    /// Body as lossy UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Header value as a string (case-insensitive lookup)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the body holds anything other than whitespace
    pub fn has_content(&self) -> bool {
        self.body.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Something that can execute a [`RequestDescriptor`]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one request. Non-success statuses come back as
    /// [`TransportError::Status`].
    async fn execute(&self, request: &RequestDescriptor) -> TransportResult<TransportResponse>;

    /// Drop pooled connections and start over with a fresh session
    fn reset(&self);
}
