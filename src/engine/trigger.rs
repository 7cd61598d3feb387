//! Periodic trigger
//!
//! Opens an engine's gate every `interval ± jitter` while the engine is
//! running. Before the engine starts it re-checks every few seconds so it
//! never misses the start.

use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::EngineError;
use crate::queue::lock;

/// Re-check delay while the target is not running
pub const NOT_RUNNING_RECHECK: Duration = Duration::from_secs(5);

/// Something a trigger can fire
pub trait TriggerTarget: Send + Sync {
    /// Whether the target accepts signals
    fn is_running(&self) -> bool;

    /// Ask for one request cycle
    fn signal(&self);
}

#[derive(Debug, Default)]
struct TriggerState {
    stopped: AtomicBool,
    stop: Notify,
}

/// Background task firing a [`TriggerTarget`] on an interval
#[derive(Debug)]
pub struct PeriodicTrigger {
    interval: Duration,
    jitter: Duration,
    state: Mutex<Arc<TriggerState>>,
    fired: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTrigger {
    /// Create a trigger. A jitter larger than the interval is ignored.
    pub fn new(interval: Duration, jitter: Duration) -> Self {
        let jitter = if jitter > interval {
            warn!(
                interval_ms = interval.as_millis() as u64,
                jitter_ms = jitter.as_millis() as u64,
                "Jitter exceeds interval, disabling jitter"
            );
            Duration::ZERO
        } else {
            jitter
        };

        Self {
            interval,
            jitter,
            state: Mutex::new(Arc::new(TriggerState::default())),
            fired: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
        }
    }

    /// Base interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Effective maximum jitter
    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    /// Number of signals sent so far
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Whether the background task is alive
    pub fn is_active(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Next delay: interval plus a uniform signed offset within the jitter
    pub fn next_delay(&self) -> Duration {
        jittered(self.interval, self.jitter)
    }

    /// Spawn the trigger task on the current runtime
    pub fn start(&self, target: Arc<dyn TriggerTarget>) -> Result<(), EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let mut handle = lock(&self.handle);
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(EngineError::AlreadyRunning);
        }

        // A stop permit left over from an earlier task must not end this one.
        let state = Arc::new(TriggerState::default());
        *lock(&self.state) = state.clone();
        let fired = self.fired.clone();
        let (interval, jitter) = (self.interval, self.jitter);
        *handle = Some(runtime.spawn(run(state, fired, target, interval, jitter)));

        info!(
            interval_ms = interval.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "Periodic trigger started"
        );
        Ok(())
    }

    /// Stop the task; it exits at its next wake-up
    pub fn stop(&self) {
        let state = lock(&self.state).clone();
        if !state.stopped.swap(true, Ordering::SeqCst) {
            state.stop.notify_one();
            debug!("Periodic trigger stopping");
        }
    }

    /// Stop and wait for the task to exit
    pub async fn shutdown(&self) {
        self.stop();
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for PeriodicTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

fn jittered(interval: Duration, jitter: Duration) -> Duration {
    let jitter_ms = jitter.as_millis() as i64;
    if jitter_ms == 0 {
        return interval;
    }
    let offset = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);
    let delay_ms = (interval.as_millis() as i64 + offset).max(0);
    Duration::from_millis(delay_ms as u64)
}

/// Sleep for `delay` unless stopped first; returns false when stopped
async fn sleep_or_stop(state: &TriggerState, delay: Duration) -> bool {
    if state.stopped.load(Ordering::SeqCst) {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => !state.stopped.load(Ordering::SeqCst),
        _ = state.stop.notified() => false,
    }
}

async fn run(
    state: Arc<TriggerState>,
    fired: Arc<AtomicU64>,
    target: Arc<dyn TriggerTarget>,
    interval: Duration,
    jitter: Duration,
) {
    loop {
        if target.is_running() {
            let delay = jittered(interval, jitter);
            if !sleep_or_stop(&state, delay).await {
                break;
            }
            if target.is_running() {
                target.signal();
                let fired = fired.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(fired, delay_ms = delay.as_millis() as u64, "Trigger fired");
            }
        } else if !sleep_or_stop(&state, NOT_RUNNING_RECHECK).await {
            break;
        }
    }
    debug!("Periodic trigger exited");
}
