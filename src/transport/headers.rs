//! Rate-limit and warning header parsing

use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::RateLimitSnapshot;

/// Remaining quota assumed when the server omits the header
pub const DEFAULT_REMAINING: i64 = 90;

/// Seconds-to-reset assumed when the server omits the reset header
pub const DEFAULT_RESET_IN_SECS: i64 = 400;

/// Header carrying server warnings
pub const WARNING_HEADER: &str = "X-Warning";

/// Names of the rate-limit headers to read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitHeaders {
    /// Window ceiling
    pub limit: String,
    /// Requests left in the window
    pub remaining: String,
    /// Window reset, Unix epoch seconds
    pub reset: String,
}

impl Default for RateLimitHeaders {
    fn default() -> Self {
        Self {
            limit: "X-Rate-Limit-Limit".to_string(),
            remaining: "X-Rate-Limit-Remaining".to_string(),
            reset: "X-Rate-Limit-Reset".to_string(),
        }
    }
}

impl RateLimitHeaders {
    /// Parse a snapshot using the current time
    pub fn parse(&self, headers: &HeaderMap, resource: &str) -> Option<RateLimitSnapshot> {
        self.parse_at(headers, resource, Utc::now().timestamp())
    }

    /// Parse a snapshot relative to `now` (epoch seconds).
    ///
    /// Returns `None` unless at least one rate-limit header is present.
    pub fn parse_at(&self, headers: &HeaderMap, resource: &str, now: i64) -> Option<RateLimitSnapshot> {
        let limit = header_i64(headers, &self.limit);
        let remaining = header_i64(headers, &self.remaining);
        let reset_at = header_i64(headers, &self.reset);

        if limit.is_none() && remaining.is_none() && reset_at.is_none() {
            return None;
        }

        let (reset_at, reset_in_seconds) = match reset_at {
            Some(at) => (at, at - now),
            None => (-1, DEFAULT_RESET_IN_SECS),
        };

        let snapshot = RateLimitSnapshot {
            reset_at,
            reset_in_seconds,
            reset_in_minutes: reset_in_seconds / 60,
            remaining: remaining.unwrap_or(DEFAULT_REMAINING),
            limit,
            resource: resource.to_string(),
        };

        debug!(
            resource = %snapshot.resource,
            remaining = snapshot.remaining,
            reset_in = snapshot.reset_in_seconds,
            "Parsed rate-limit headers"
        );
        Some(snapshot)
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    let raw = headers.get(name)?.to_str().ok()?.trim();
    match raw.parse::<i64>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(header = name, value = raw, error = %e, "Failed to parse rate-limit header");
            None
        }
    }
}

/// Value of the `X-Warning` header, if present and non-empty
pub fn warning_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(WARNING_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
