//! Single-slot request gate
//!
//! A boolean latch plus a [`Notify`]. Signals before consumption collapse
//! into one permit; a signal sent while the worker is busy stays latched
//! until the worker comes back to wait.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Hand-off between signalers and the worker
#[derive(Debug, Default)]
pub struct RequestGate {
    open: AtomicBool,
    notify: Notify,
}

impl RequestGate {
    /// Closed gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate
    pub fn signal(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether a signal is waiting to be consumed
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close without consuming, dropping any latched signal
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Close the gate if open; returns whether a signal was consumed
    pub fn try_consume(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }

    /// Wait until the gate is open, then close it
    pub async fn await_and_consume(&self) {
        loop {
            self.wait_open().await;
            if self.try_consume() {
                return;
            }
        }
    }

    /// Wait until the gate is open without consuming the signal
    pub async fn wait_open(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent signal wakes us.
            notified.as_mut().enable();

            if self.is_open() {
                return;
            }
            notified.await;
        }
    }
}
