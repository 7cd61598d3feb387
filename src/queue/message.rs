//! Drop-newest message queue with optional downstream delegation

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{lock, DEFAULT_MAX_QUEUE_LEN};
use crate::Message;

/// Result of pushing a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Buffered locally
    Queued,
    /// Forwarded to the registered receiver
    Forwarded,
    /// Queue was full; the message was discarded
    Dropped,
}

/// Bounded FIFO of decoded payloads.
///
/// When a receiver is registered, pushes go straight to the receiver's queue
/// (and its capacity rules apply there). Several engines can share one
/// receiver to fan results into a single place.
#[derive(Debug)]
pub struct MessageQueue {
    buffer: Mutex<VecDeque<Message>>,
    max_len: usize,
    receiver: Mutex<Option<Arc<MessageQueue>>>,
    dropped: AtomicU64,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_LEN)
    }
}

impl MessageQueue {
    /// Create a queue holding at most `max_len` messages
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            max_len,
            receiver: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Capacity
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Register (or clear) the downstream receiver
    pub fn set_receiver(&self, receiver: Option<Arc<MessageQueue>>) {
        *lock(&self.receiver) = receiver;
    }

    /// Currently registered receiver
    pub fn receiver(&self) -> Option<Arc<MessageQueue>> {
        lock(&self.receiver).clone()
    }

    /// Push a message, dropping it if the queue is full
    pub fn push(&self, message: Message) -> PushOutcome {
        if let Some(receiver) = self.receiver() {
            return match receiver.push(message) {
                PushOutcome::Dropped => PushOutcome::Dropped,
                _ => PushOutcome::Forwarded,
            };
        }

        let mut buffer = lock(&self.buffer);
        if buffer.len() >= self.max_len {
            drop(buffer);
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            crate::metrics::record_message_dropped();
            warn!(
                max_len = self.max_len,
                dropped_total = dropped,
                "Message queue full, dropping incoming message"
            );
            return PushOutcome::Dropped;
        }

        buffer.push_back(message);
        PushOutcome::Queued
    }

    /// Pop the oldest message.
    ///
    /// With `flush` set, the whole buffer is cleared and nothing is returned.
    pub fn next_message(&self, flush: bool) -> Option<Message> {
        let mut buffer = lock(&self.buffer);
        if flush {
            let cleared = buffer.len();
            buffer.clear();
            debug!(cleared, "Message queue flushed");
            return None;
        }
        buffer.pop_front()
    }

    /// Take every buffered message, oldest first
    pub fn drain(&self) -> Vec<Message> {
        lock(&self.buffer).drain(..).collect()
    }

    /// Number of buffered messages
    pub fn len(&self) -> usize {
        lock(&self.buffer).len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
