//! Bounded buffers shared between the worker and callers
//!
//! Two collections with deliberately different overflow policies:
//!
//! - [`MessageQueue`]: FIFO of decoded payloads. When full, the incoming
//!   message is dropped and the existing contents are kept.
//! - [`PriorRequestLog`]: sliding window of request records. When full, the
//!   oldest record is evicted to admit the new one.
//!
//! Both are guarded by their own `std::sync::Mutex`. Neither operation awaits
//! while holding the lock, so a blocking mutex is enough even when called from
//! async tasks.

pub mod history;
pub mod message;

pub use history::PriorRequestLog;
pub use message::{MessageQueue, PushOutcome};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default maximum number of buffered messages
pub const DEFAULT_MAX_QUEUE_LEN: usize = 8000;

/// Default number of request records kept for diagnostics
pub const DEFAULT_MAX_PRIOR_REQUESTS: usize = 25;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
