//! Request pacing
//!
//! Two modes:
//! - Fixed: a back-off table keyed on time since the previous check
//! - Quota: spread the remaining rate-limit quota over the time left in
//!   the window

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::record_throttle_wait;
use crate::queue::lock;
use crate::RateLimitSnapshot;

/// Wait used when the rate-limit window has already expired
pub const EXPIRED_WINDOW_WAIT: Duration = Duration::from_secs(60);

/// Which pacing rule produced a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleMode {
    /// Back-off table
    Fixed,
    /// Rate-limit quota
    Quota,
}

impl ThrottleMode {
    /// Label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Quota => "quota",
        }
    }
}

/// Fixed back-off table
///
/// | elapsed       | wait  |
/// |---------------|-------|
/// | < 0.5 s       | 2.5 s |
/// | < 1.0 s       | 1.5 s |
/// | < 2.0 s       | 0.75 s|
/// | otherwise     | 0     |
pub fn fixed_interval_wait(elapsed: Duration) -> Duration {
    let secs = elapsed.as_secs_f64();
    if secs < 0.5 {
        Duration::from_millis(2500)
    } else if secs < 1.0 {
        Duration::from_millis(1500)
    } else if secs < 2.0 {
        Duration::from_millis(750)
    } else {
        Duration::ZERO
    }
}

/// Quota-aware wait for `snapshot`
pub fn quota_wait(snapshot: &RateLimitSnapshot) -> Duration {
    let reset_in = snapshot.reset_in_seconds;
    if reset_in < 0 {
        return EXPIRED_WINDOW_WAIT;
    }
    let secs = if snapshot.remaining < 2 {
        reset_in as f64 + 1.0
    } else {
        reset_in as f64 / snapshot.remaining as f64 + 1.0
    };
    Duration::from_secs_f64(secs.max(0.0))
}

/// Stateful pacing calculator
#[derive(Debug, Default)]
pub struct ThrottleController {
    last_check: Mutex<Option<Instant>>,
    deferred: Mutex<Option<(Instant, ThrottleMode)>>,
}

impl ThrottleController {
    /// Controller with no previous check
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the previous check
    pub fn last_check(&self) -> Option<Instant> {
        *lock(&self.last_check)
    }

    /// Compute the next wait and record this check.
    ///
    /// Quota mode applies when a snapshot is known. In fixed mode the very
    /// first check waits nothing.
    pub fn next_wait(&self, snapshot: Option<&RateLimitSnapshot>) -> (Duration, ThrottleMode) {
        let now = Instant::now();
        let previous = lock(&self.last_check).replace(now);

        match snapshot {
            Some(snapshot) => (quota_wait(snapshot), ThrottleMode::Quota),
            None => {
                let wait = previous
                    .map(|prev| fixed_interval_wait(now.saturating_duration_since(prev)))
                    .unwrap_or(Duration::ZERO);
                (wait, ThrottleMode::Fixed)
            }
        }
    }

    /// Sleep for `wait`
    pub async fn pace(&self, wait: Duration, mode: ThrottleMode) {
        record_throttle_wait(wait, mode.as_str());
        if wait.is_zero() {
            return;
        }
        debug!(
            wait_ms = wait.as_millis() as u64,
            mode = mode.as_str(),
            "Throttling before next request"
        );
        tokio::time::sleep(wait).await;
    }

    /// Hold `wait` over to the next request instead of sleeping now
    pub fn defer(&self, wait: Duration, mode: ThrottleMode) {
        let deferred = (!wait.is_zero()).then(|| (Instant::now() + wait, mode));
        *lock(&self.deferred) = deferred;
    }

    /// Time left on a deferred wait
    pub fn deferred_wait(&self) -> Duration {
        lock(&self.deferred)
            .map(|(until, _)| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Sleep out whatever is left of a deferred wait
    pub async fn wait_turn(&self) {
        let deferred = lock(&self.deferred).take();
        if let Some((until, mode)) = deferred {
            let wait = until.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                self.pace(wait, mode).await;
            }
        }
    }

    /// Forget the previous check and any deferred wait
    pub fn reset(&self) {
        *lock(&self.last_check) = None;
        *lock(&self.deferred) = None;
    }
}
