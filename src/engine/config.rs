//! Engine configuration and defaults

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::EngineError;
use crate::queue::{DEFAULT_MAX_PRIOR_REQUESTS, DEFAULT_MAX_QUEUE_LEN};
use crate::transport::retry::DEFAULT_RETRY_ATTEMPTS;
use crate::transport::{HttpSettings, RateLimitHeaders};

/// Default number of requests in one continuation burst
pub const DEFAULT_CONTINUATION_MAX: u32 = 10;

/// Smallest page size an API accepts
pub const MIN_PAGE_SIZE: u32 = 1;

/// Largest page size an API accepts
pub const MAX_PAGE_SIZE: u32 = 100;

/// Query parameter receiving the page size
pub const PAGE_SIZE_PARAM: &str = "count";

/// Interval at which `wait_for_result` polls, in milliseconds
pub const DEFAULT_WAIT_POLL_INTERVAL_MS: u64 = 2000;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(retry_count));
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}

/// Clamp a requested page size into `MIN_PAGE_SIZE..=MAX_PAGE_SIZE`
pub fn clamp_page_size(size: u32) -> u32 {
    size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

/// Engine configuration. Every field has a default, so a partial JSON file
/// is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pace requests with the throttle controller
    pub throttling: bool,
    /// Follow continuation references within a cycle
    pub continuation: bool,
    /// Most requests in one continuation burst
    pub continuation_max: u32,
    /// Message queue capacity
    pub max_queue_len: usize,
    /// Request history capacity
    pub max_prior_requests: usize,
    /// Transport calls per request
    pub retry_attempts: u32,
    /// Page size written to the `count` parameter
    pub page_size: Option<u32>,
    /// Poll interval of `wait_for_result`, milliseconds
    pub wait_poll_interval_ms: u64,
    /// Periodic trigger interval, milliseconds; no trigger when unset
    pub timer_interval_ms: Option<u64>,
    /// Maximum trigger jitter, milliseconds
    pub timer_jitter_ms: u64,
    /// Turn throttling off between the requests of a continuation burst
    pub suspend_throttling_in_burst: bool,
    /// HTTP client settings
    pub http: HttpSettings,
    /// Rate-limit header names
    pub rate_limit_headers: RateLimitHeaders,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            throttling: false,
            continuation: false,
            continuation_max: DEFAULT_CONTINUATION_MAX,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            max_prior_requests: DEFAULT_MAX_PRIOR_REQUESTS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            page_size: None,
            wait_poll_interval_ms: DEFAULT_WAIT_POLL_INTERVAL_MS,
            timer_interval_ms: None,
            timer_jitter_ms: 0,
            suspend_throttling_in_burst: false,
            http: HttpSettings::default(),
            rate_limit_headers: RateLimitHeaders::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Parse from a JSON string
    pub fn from_json(content: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| EngineError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.retry_attempts == 0 {
            return Err(EngineError::Configuration(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.wait_poll_interval_ms == 0 {
            return Err(EngineError::Configuration(
                "wait_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.timer_interval_ms == Some(0) {
            return Err(EngineError::Configuration(
                "timer_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll interval of `wait_for_result`
    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }

    /// Trigger interval, when a periodic trigger is configured
    pub fn timer_interval(&self) -> Option<Duration> {
        self.timer_interval_ms.map(Duration::from_millis)
    }

    /// Maximum trigger jitter
    pub fn timer_jitter(&self) -> Duration {
        Duration::from_millis(self.timer_jitter_ms)
    }
}
