//! Pagination state for one request cycle
//!
//! Supports three modes:
//! - Single: exactly one request per cycle
//! - Cursor: signed integer cursors, starting at -1 and finished at 0
//! - Continuation: opaque "next page" references, capped per cycle
//!
//! Includes safety mechanisms:
//! - Hard page limit for cursor cycles whose server never returns 0
//! - Continuation cap shrunk to the remaining rate-limit quota when throttling

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::endpoint::ParsedPage;
use crate::{Method, RateLimitSnapshot, RequestDescriptor};

/// Cursor value that starts a traversal
pub const CURSOR_START: i64 = -1;

/// Cursor value meaning "no more pages"
pub const CURSOR_END: i64 = 0;

/// Maximum pages in one cursor cycle
pub const MAX_PAGES: u32 = 10_000;

/// Which cursor drives the traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorDirection {
    /// Follow `next_cursor`
    #[default]
    Forward,
    /// Follow `previous_cursor`
    Backward,
}

/// Numeric cursor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorConfig {
    /// Query parameter carrying the cursor
    pub param: String,
    /// Active direction
    pub direction: CursorDirection,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            param: "cursor".to_string(),
            direction: CursorDirection::Forward,
        }
    }
}

/// How an endpoint pages through results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationMode {
    /// One request per cycle
    Single,
    /// Numeric cursors
    Cursor(CursorConfig),
    /// Continuation tokens
    Continuation,
}

/// Cursor and continuation state of the current (or last) cycle
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CursorState {
    /// Forward cursor; 0 once exhausted
    pub next_cursor: i64,
    /// Backward cursor; 0 once exhausted
    pub prev_cursor: i64,
    /// Reference to the next page, if the server sent one
    pub continuation_token: Option<String>,
    /// Requests issued in this continuation burst
    pub continuation_count: u32,
    /// Most requests allowed in this burst
    pub continuation_cap: u32,
    /// Pages fetched in this cycle
    pub pages: u32,
}

impl CursorState {
    /// Burst cap for a new cycle.
    ///
    /// With throttling and continuation both on and a known quota, the cap is
    /// `min(configured_max, remaining)`. Otherwise, or once the quota window
    /// has reset, it is `configured_max`.
    pub fn continuation_cap(
        configured_max: u32,
        throttling: bool,
        continuation: bool,
        snapshot: Option<&RateLimitSnapshot>,
    ) -> u32 {
        match snapshot {
            Some(snapshot) if throttling && continuation && !snapshot.is_expired() => {
                let remaining = u32::try_from(snapshot.remaining.max(0)).unwrap_or(u32::MAX);
                if remaining < configured_max {
                    debug!(
                        remaining,
                        configured_max, "Too few requests left for a full continuation burst"
                    );
                }
                configured_max.min(remaining)
            }
            _ => configured_max,
        }
    }

    /// Reset for a new cycle
    pub fn begin_cycle(&mut self, cap: u32) {
        *self = Self {
            next_cursor: CURSOR_START,
            prev_cursor: CURSOR_START,
            continuation_token: None,
            continuation_count: 0,
            continuation_cap: cap,
            pages: 0,
        };
    }

    fn active_cursor(&self, direction: CursorDirection) -> i64 {
        match direction {
            CursorDirection::Forward => self.next_cursor,
            CursorDirection::Backward => self.prev_cursor,
        }
    }

    /// Whether another request belongs to this cycle
    pub fn should_request(&self, mode: &PaginationMode, continuation: bool) -> bool {
        match mode {
            PaginationMode::Single => self.pages == 0,
            PaginationMode::Cursor(config) => {
                if self.pages >= MAX_PAGES {
                    warn!(
                        pages = self.pages,
                        "Max pages ({MAX_PAGES}) reached, possible infinite cursor loop"
                    );
                    return false;
                }
                self.active_cursor(config.direction) != CURSOR_END
            }
            PaginationMode::Continuation => {
                if self.continuation_count >= self.continuation_cap {
                    return false;
                }
                self.pages == 0
                    || (continuation
                        && self
                            .continuation_token
                            .as_deref()
                            .is_some_and(|t| !t.is_empty()))
            }
        }
    }

    /// Request for the next page, derived from the configured `base`
    pub fn page_request(&self, mode: &PaginationMode, base: &RequestDescriptor) -> RequestDescriptor {
        match mode {
            PaginationMode::Single => base.clone(),
            PaginationMode::Cursor(config) => {
                let mut request = base.clone();
                let cursor = self.active_cursor(config.direction);
                request.set_param(config.param.clone(), Some(cursor.to_string()));
                request
            }
            PaginationMode::Continuation => match &self.continuation_token {
                Some(token) if self.pages > 0 && !token.is_empty() => {
                    continuation_request(base, token)
                }
                _ => base.clone(),
            },
        }
    }

    /// Record a fetched page
    pub fn advance(&mut self, mode: &PaginationMode, page: &ParsedPage) {
        self.pages += 1;
        match mode {
            PaginationMode::Single => {}
            PaginationMode::Cursor(_) => {
                if page.api_error.is_some() {
                    self.next_cursor = CURSOR_END;
                    self.prev_cursor = CURSOR_END;
                } else {
                    self.next_cursor = page.next_cursor.unwrap_or(CURSOR_END);
                    self.prev_cursor = page.prev_cursor.unwrap_or(CURSOR_END);
                }
            }
            PaginationMode::Continuation => {
                self.continuation_token = page.next_token.clone().filter(|t| !t.is_empty());
                self.continuation_count += 1;
            }
        }
    }

    /// Stop paging: cursors to 0, token dropped
    pub fn terminate(&mut self) {
        self.pages += 1;
        self.next_cursor = CURSOR_END;
        self.prev_cursor = CURSOR_END;
        self.continuation_token = None;
        self.continuation_count = self.continuation_count.saturating_add(1);
    }
}

/// GET request for a continuation reference.
///
/// A relative reference (for example `?max_id=1&q=x`) is appended to the base
/// URL without its query string; an absolute URL is used as is. The
/// reference carries its own query, so configured params are dropped.
fn continuation_request(base: &RequestDescriptor, token: &str) -> RequestDescriptor {
    let url = if token.starts_with("http://") || token.starts_with("https://") {
        token.to_string()
    } else {
        let root = base.url.split('?').next().unwrap_or_default();
        format!("{root}{token}")
    };

    RequestDescriptor {
        url,
        method: Method::Get,
        params: Default::default(),
        headers: base.headers.clone(),
        payload: None,
    }
}
