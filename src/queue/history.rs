//! Sliding-window log of prior requests

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{lock, DEFAULT_MAX_PRIOR_REQUESTS};
use crate::{RequestOutcome, RequestRecord};

/// Bounded log of [`RequestRecord`]s, most recent last.
///
/// When full, the oldest record is evicted before the new one is appended.
#[derive(Debug)]
pub struct PriorRequestLog {
    records: Mutex<VecDeque<RequestRecord>>,
    max_len: usize,
}

impl Default for PriorRequestLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PRIOR_REQUESTS)
    }
}

impl PriorRequestLog {
    /// Create a log keeping at most `max_len` records
    pub fn new(max_len: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_len.min(64))),
            max_len,
        }
    }

    /// Capacity
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Append a record, evicting the oldest if needed
    pub fn push(&self, record: RequestRecord) {
        if self.max_len == 0 {
            return;
        }
        let mut records = lock(&self.records);
        while records.len() >= self.max_len {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Apply `outcome` to the newest record if it is still pending.
    ///
    /// Returns false when there is no record or it already has an outcome.
    pub fn finish_last(&self, outcome: RequestOutcome) -> bool {
        lock(&self.records)
            .back_mut()
            .map(|record| record.finish(outcome))
            .unwrap_or(false)
    }

    /// Clone of the newest record
    pub fn last(&self) -> Option<RequestRecord> {
        lock(&self.records).back().cloned()
    }

    /// Remove and return the newest record
    pub fn pop_last(&self) -> Option<RequestRecord> {
        lock(&self.records).pop_back()
    }

    /// All records, oldest first
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        lock(&self.records).iter().cloned().collect()
    }

    /// Count of records whose outcome is still pending
    pub fn pending(&self) -> usize {
        lock(&self.records).iter().filter(|r| r.is_pending()).count()
    }

    /// Remove all records
    pub fn clear(&self) {
        lock(&self.records).clear();
    }

    /// Number of records
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
