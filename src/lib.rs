//! # REST Poller Library
//!
//! A single-flight polling engine for rate-limited, paginated REST APIs.
//! One background worker per engine issues requests when a caller (or a
//! periodic trigger) opens its gate, while the caller drains decoded results
//! from a bounded queue at its own pace.
//!
//! ## Features
//!
//! - **Single-flight**: at most one request cycle in flight per engine
//! - **Bounded buffering**: drop-newest message queue, sliding-window request history
//! - **Retry**: data-driven status table with transient/fatal classification
//! - **Throttling**: fixed back-off table or rate-limit quota pacing
//! - **Pagination**: numeric cursors and continuation tokens
//! - **Periodic polling**: optional jittered trigger
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rest_poller::endpoint::ContinuationEndpoint;
//! use rest_poller::engine::{EngineConfig, RequestEngine};
//! use rest_poller::transport::HttpTransport;
//! use rest_poller::RequestDescriptor;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let engine = RequestEngine::builder(
//!     Arc::new(ContinuationEndpoint::default()),
//!     Arc::new(HttpTransport::new(&config.http)?),
//! )
//! .config(config)
//! .descriptor(RequestDescriptor::get("https://api.example.com/search.json").with_param("q", "rust"))
//! .build();
//!
//! engine.start()?;
//! engine.signal();
//! engine.wait_for_result().await;
//! while let Some(message) = engine.next_message(false) {
//!     println!("{message}");
//! }
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`queue`] - Bounded message queue and prior-request log
//! - [`transport`] - Transport collaborator, HTTP/bearer implementations, retry policy
//! - [`pagination`] - Cursor and continuation-token state
//! - [`endpoint`] - Per-endpoint request building and response parsing
//! - [`engine`] - Request gate, throttle, worker loop, periodic trigger
//! - [`metrics`] - Prometheus metrics for requests, retries and pacing

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::transport::TransportResponse;

/// CLI command implementations
pub mod cli;

/// Worker loop, gate, throttle and periodic trigger
pub mod engine;

/// Endpoint strategies
pub mod endpoint;

/// Metrics collection
pub mod metrics;

/// Pagination cursor state
pub mod pagination;

/// Bounded queues
pub mod queue;

/// Transport collaborators and retry policy
pub mod transport;

pub use engine::{EngineConfig, EngineError, RequestEngine};

/// A decoded payload unit handed to callers.
pub type Message = serde_json::Value;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Method {
    /// GET request, params sent as the query string
    #[default]
    #[serde(rename = "GET")]
    Get,
    /// POST request, payload sent as the body
    #[serde(rename = "POST")]
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            _ => Err(format!("Invalid method: {s}")),
        }
    }
}

/// What to request: URL, method, query parameters, headers and payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Absolute URL
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Query parameters (keys unique)
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Body, only kept for POST
    #[serde(default)]
    pub payload: Option<String>,
}

impl RequestDescriptor {
    /// GET descriptor for `url`
    pub fn get(url: impl AsRef<str>) -> Self {
        Self {
            url: normalize_url(url.as_ref()),
            ..Self::default()
        }
    }

    /// POST descriptor for `url` with an optional body
    pub fn post(url: impl AsRef<str>, payload: Option<String>) -> Self {
        Self {
            url: normalize_url(url.as_ref()),
            method: Method::Post,
            payload,
            ..Self::default()
        }
    }

    /// Add a query parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set a parameter, or remove it when `value` is `None` or empty
    pub fn set_param(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match value {
            Some(v) if !v.is_empty() => {
                self.params.insert(key, v);
            }
            _ => {
                self.params.remove(&key);
            }
        }
    }

    /// Remove a parameter, returning its previous value
    pub fn remove_param(&mut self, key: &str) -> Option<String> {
        self.params.remove(key)
    }

    /// Current value of a parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Remove all parameters
    pub fn clear_params(&mut self) {
        self.params.clear();
    }

    /// Change the method. Switching to GET discards the payload.
    pub fn set_method(&mut self, method: Method) {
        self.method = method;
        if method == Method::Get {
            self.payload = None;
        }
    }

    /// Validate the descriptor before it is sent
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("Request URL is required".to_string());
        }

        if self.method == Method::Get && self.payload.is_some() {
            return Err("GET requests cannot carry a payload".to_string());
        }

        Ok(())
    }
}

/// Prefix `http://` when the URL has no scheme. Empty input stays empty.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Rate-limit quota state captured from response headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    /// Window reset time (Unix epoch seconds), -1 when unknown
    pub reset_at: i64,
    /// Seconds until the window resets, negative once expired
    pub reset_in_seconds: i64,
    /// Minutes until the window resets
    pub reset_in_minutes: i64,
    /// Requests left in the window
    pub remaining: i64,
    /// Window ceiling, when the server reports it
    pub limit: Option<i64>,
    /// Resource the quota applies to
    pub resource: String,
}

impl RateLimitSnapshot {
    /// Same snapshot with the reset countdown recomputed against `now`
    /// (epoch seconds). An unknown reset time is left as parsed.
    pub fn refreshed_at(&self, now: i64) -> Self {
        let mut snapshot = self.clone();
        if snapshot.reset_at >= 0 {
            snapshot.reset_in_seconds = snapshot.reset_at - now;
            snapshot.reset_in_minutes = snapshot.reset_in_seconds / 60;
        }
        snapshot
    }

    /// Whether the quota window has already reset
    pub fn is_expired(&self) -> bool {
        self.reset_at >= 0 && self.reset_in_seconds < 0
    }
}

/// Snapshot of one request and, once finished, its outcome
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// Request as sent
    pub request: RequestDescriptor,
    /// When the request started
    pub started_at: DateTime<Utc>,
    /// Raw response, when one was received
    pub response: Option<TransportResponse>,
    /// Warning header reported by the server
    pub warning: Option<String>,
    /// Structured error, from the API payload or the transport
    pub error: Option<serde_json::Value>,
    /// `None` while in flight
    pub success: Option<bool>,
    /// Continuation reference reported in the payload metadata
    pub next_results: Option<String>,
    /// Refresh reference reported in the payload metadata
    pub refresh_url: Option<String>,
    /// Transport calls spent on this request
    pub attempts: u32,
}

impl RequestRecord {
    /// New in-flight record
    pub fn started(request: RequestDescriptor) -> Self {
        Self {
            request,
            started_at: Utc::now(),
            response: None,
            warning: None,
            error: None,
            success: None,
            next_results: None,
            refresh_url: None,
            attempts: 0,
        }
    }

    /// Whether the outcome is still pending
    pub fn is_pending(&self) -> bool {
        self.success.is_none()
    }

    /// Apply the single completion mutation. Returns false if already finished.
    pub fn finish(&mut self, outcome: RequestOutcome) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.response = outcome.response;
        self.warning = outcome.warning;
        self.error = outcome.error;
        self.next_results = outcome.next_results;
        self.refresh_url = outcome.refresh_url;
        self.attempts = outcome.attempts;
        self.success = Some(outcome.success);
        true
    }
}

/// Outcome applied once to a pending [`RequestRecord`]
#[derive(Debug, Clone, Default)]
pub struct RequestOutcome {
    /// Raw response
    pub response: Option<TransportResponse>,
    /// Warning header
    pub warning: Option<String>,
    /// Structured error
    pub error: Option<serde_json::Value>,
    /// Whether the request produced a usable result
    pub success: bool,
    /// Continuation reference
    pub next_results: Option<String>,
    /// Refresh reference
    pub refresh_url: Option<String>,
    /// Transport calls spent
    pub attempts: u32,
}
