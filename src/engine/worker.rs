//! Engine, builder and the request cycle

use chrono::Utc;
use futures_util::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::{clamp_page_size, PAGE_SIZE_PARAM};
use super::{EngineConfig, EngineError, PeriodicTrigger, RequestGate, ThrottleController, TriggerTarget};
use crate::endpoint::{Endpoint, ParsedPage};
use crate::metrics::{record_rate_limit, record_worker_fault, CycleMetrics};
use crate::pagination::{CursorState, PaginationMode};
use crate::queue::{lock, MessageQueue, PriorRequestLog, PushOutcome};
use crate::transport::{warning_header, ErrorKind, RetryPolicy, Transport};
use crate::{Message, RateLimitSnapshot, RequestDescriptor, RequestOutcome, RequestRecord};

/// Summary of one request cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Requests issued (each possibly retried)
    pub requests: u32,
    /// Messages queued or forwarded
    pub messages: usize,
    /// Messages dropped on a full queue
    pub dropped: usize,
    /// Why the cycle was cut short, if it was
    pub failure: Option<ErrorKind>,
}

enum PageResult {
    Parsed(ParsedPage),
    Empty,
    Malformed,
    Failed(ErrorKind),
}

/// Clears the in-progress flag when the cycle ends, unwinding included
struct InProgressGuard<'a>(&'a EngineShared);

impl<'a> InProgressGuard<'a> {
    fn acquire(shared: &'a EngineShared) -> Option<Self> {
        shared
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(shared))
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.in_progress.store(false, Ordering::SeqCst);
        self.0.idle.notify_waiters();
    }
}

struct EngineShared {
    name: String,
    config: EngineConfig,
    endpoint: Arc<dyn Endpoint>,
    transport: Arc<dyn Transport>,
    authenticator: Mutex<Option<Arc<dyn Transport>>>,
    retry: RetryPolicy,
    descriptor: Mutex<RequestDescriptor>,
    rate_limit: Mutex<Option<RateLimitSnapshot>>,
    cursor: Mutex<CursorState>,
    messages: MessageQueue,
    history: PriorRequestLog,
    gate: RequestGate,
    throttle: ThrottleController,
    running: AtomicBool,
    in_progress: AtomicBool,
    idle: Notify,
    throttling: AtomicBool,
    continuation: AtomicBool,
    cycles: AtomicU64,
}

impl TriggerTarget for EngineShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn signal(&self) {
        self.gate.signal();
    }
}

impl EngineShared {
    fn active_transport(&self) -> Arc<dyn Transport> {
        lock(&self.authenticator)
            .clone()
            .unwrap_or_else(|| self.transport.clone())
    }

    /// Latest snapshot with its reset countdown taken against now
    fn rate_limit_snapshot(&self) -> Option<RateLimitSnapshot> {
        lock(&self.rate_limit)
            .as_ref()
            .map(|snapshot| snapshot.refreshed_at(Utc::now().timestamp()))
    }

    /// Mutate the descriptor unless a cycle is in flight
    fn with_descriptor<T>(&self, f: impl FnOnce(&mut RequestDescriptor) -> T) -> Result<T, EngineError> {
        let mut descriptor = lock(&self.descriptor);
        if self.in_progress.load(Ordering::SeqCst) {
            return Err(EngineError::Busy);
        }
        Ok(f(&mut descriptor))
    }

    /// Wait until no cycle is in flight
    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.in_progress.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Run one cycle. With `from_gate`, the pending signal is consumed only
    /// once the cycle owns the in-progress flag, so a signal that loses the
    /// race to a foreground cycle stays latched.
    async fn execute_cycle(&self, from_gate: bool) -> Result<CycleReport, EngineError> {
        let _guard = InProgressGuard::acquire(self).ok_or(EngineError::Busy)?;
        if from_gate {
            self.gate.try_consume();
        }

        let span = info_span!(
            "request_cycle",
            engine = %self.name,
            endpoint = %self.endpoint.name(),
            cycle = self.cycles.load(Ordering::SeqCst) + 1
        );
        let report = self.run_pages().instrument(span).await;
        self.cycles.fetch_add(1, Ordering::SeqCst);
        Ok(report)
    }

    async fn run_pages(&self) -> CycleReport {
        let metrics = CycleMetrics::start(&self.name);
        let mut report = CycleReport::default();

        let configured = lock(&self.descriptor).clone();
        let Some(base) = self.endpoint.build_request(&configured) else {
            debug!("Nothing to request this cycle");
            metrics.record_complete(&report);
            return report;
        };

        let mode = self.endpoint.pagination();
        let throttling_saved = self.throttling.load(Ordering::SeqCst);
        let continuation = self.continuation.load(Ordering::SeqCst);
        let cap = CursorState::continuation_cap(
            self.config.continuation_max,
            throttling_saved,
            continuation,
            self.rate_limit_snapshot().as_ref(),
        );

        let mut cursor = CursorState::default();
        cursor.begin_cycle(cap);
        *lock(&self.cursor) = cursor.clone();
        let mut suspended = false;

        debug!(?mode, cap, throttling = throttling_saved, continuation, "Starting request cycle");

        if throttling_saved && cursor.should_request(&mode, continuation) {
            self.throttle.wait_turn().await;
        }

        while cursor.should_request(&mode, continuation) {
            let request = cursor.page_request(&mode, &base);
            report.requests += 1;

            match self.issue(request).await {
                PageResult::Parsed(mut page) => {
                    for message in std::mem::take(&mut page.messages) {
                        self.queue_message(message, &mut report);
                    }
                    cursor.advance(&mode, &page);
                }
                PageResult::Empty | PageResult::Malformed => cursor.terminate(),
                PageResult::Failed(kind) => {
                    report.failure = Some(kind);
                    cursor.terminate();
                }
            }
            *lock(&self.cursor) = cursor.clone();

            let more = cursor.should_request(&mode, continuation);
            if more
                && !suspended
                && continuation
                && self.config.suspend_throttling_in_burst
                && matches!(mode, PaginationMode::Continuation)
            {
                suspended = true;
                self.throttling.store(false, Ordering::SeqCst);
                debug!("Throttling suspended for continuation burst");
            }

            if self.throttling.load(Ordering::SeqCst) {
                let (wait, throttle_mode) = self.throttle.next_wait(self.rate_limit_snapshot().as_ref());
                if more {
                    self.throttle.pace(wait, throttle_mode).await;
                } else {
                    self.throttle.defer(wait, throttle_mode);
                }
            }
        }

        if suspended {
            self.throttling.store(throttling_saved, Ordering::SeqCst);
        }

        info!(
            requests = report.requests,
            messages = report.messages,
            dropped = report.dropped,
            failure = report.failure.map(|k| k.as_str()),
            "Request cycle complete"
        );
        metrics.record_complete(&report);
        report
    }

    fn queue_message(&self, message: Message, report: &mut CycleReport) {
        match self.messages.push(message) {
            PushOutcome::Dropped => report.dropped += 1,
            PushOutcome::Queued | PushOutcome::Forwarded => report.messages += 1,
        }
    }

    /// Send one request under the retry policy and record its outcome
    async fn issue(&self, request: RequestDescriptor) -> PageResult {
        self.history.push(RequestRecord::started(request.clone()));

        let transport = self.active_transport();
        let outcome = self
            .retry
            .execute(transport.as_ref(), &request, self.endpoint.name())
            .await;
        let attempts = outcome.attempts_used;

        let response = match outcome.result {
            Ok(response) => response,
            Err(error) => {
                let kind = outcome.kind.unwrap_or(ErrorKind::FatalStatus);
                let mut detail = error.to_json();
                detail["kind"] = json!(kind.as_str());
                self.history.finish_last(RequestOutcome {
                    error: Some(detail),
                    success: false,
                    attempts,
                    ..RequestOutcome::default()
                });
                warn!(kind = %kind, attempts, error = %error, "Request failed, ending cycle");
                return PageResult::Failed(kind);
            }
        };

        let warning = warning_header(&response.headers);
        if let Some(warning) = &warning {
            warn!(%warning, "Server returned a warning");
        }

        if let Some(snapshot) = self
            .config
            .rate_limit_headers
            .parse(&response.headers, self.endpoint.rate_limit_resource())
        {
            record_rate_limit(&snapshot);
            *lock(&self.rate_limit) = Some(snapshot);
        }

        if !response.has_content() {
            debug!(status = response.status, "Empty response body");
            self.history.finish_last(RequestOutcome {
                response: Some(response),
                warning,
                success: false,
                attempts,
                ..RequestOutcome::default()
            });
            return PageResult::Empty;
        }

        let payload = match response.json() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(error = %error, "Dropping undecodable response");
                let mut detail = error.to_json();
                detail["kind"] = json!(ErrorKind::Malformed.as_str());
                self.history.finish_last(RequestOutcome {
                    response: Some(response),
                    warning,
                    error: Some(detail),
                    success: false,
                    attempts,
                    ..RequestOutcome::default()
                });
                return PageResult::Malformed;
            }
        };

        let page = self.endpoint.parse_response(payload);
        if let Some(api_error) = &page.api_error {
            warn!(error = %api_error, "API reported an error");
        }

        self.history.finish_last(RequestOutcome {
            response: Some(response),
            warning,
            error: page.api_error.clone(),
            success: page.api_error.is_none(),
            next_results: page.next_token.clone(),
            refresh_url: page.refresh_url.clone(),
            attempts,
        });
        PageResult::Parsed(page)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn worker_loop(shared: Arc<EngineShared>, mut stop: watch::Receiver<bool>) {
    info!(engine = %shared.name, "Worker started");

    while shared.running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = shared.gate.wait_open() => {}
            _ = stop.changed() => break,
        }
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        match AssertUnwindSafe(shared.execute_cycle(true)).catch_unwind().await {
            Ok(Ok(report)) => debug!(requests = report.requests, "Worker cycle finished"),
            Ok(Err(EngineError::Busy)) => {
                debug!("Cycle already in flight, keeping signal for the next one");
                tokio::select! {
                    _ = shared.wait_idle() => {}
                    _ = stop.changed() => break,
                }
            }
            Ok(Err(e)) => debug!(error = %e, "Signal skipped"),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(engine = %shared.name, %reason, "Worker fault, engine stopped");
                record_worker_fault(&shared.name);
                shared.history.finish_last(RequestOutcome {
                    error: Some(json!({"kind": "worker_fault", "message": reason})),
                    success: false,
                    ..RequestOutcome::default()
                });
                shared.running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    info!(engine = %shared.name, "Worker stopped");
}

/// Single-flight polling engine.
///
/// All non-waiting operations are synchronous and safe to call from any
/// thread. Dropping the engine stops its worker and trigger.
pub struct RequestEngine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stop: Mutex<Option<watch::Sender<bool>>>,
    trigger: Option<PeriodicTrigger>,
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .field("in_progress", &self.is_in_progress())
            .finish()
    }
}

impl RequestEngine {
    /// Start building an engine for `endpoint` over `transport`
    pub fn builder(endpoint: Arc<dyn Endpoint>, transport: Arc<dyn Transport>) -> EngineBuilder {
        EngineBuilder::new(endpoint, transport)
    }

    /// Engine name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Effective configuration
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Replace the request descriptor. Rejected with [`EngineError::Busy`]
    /// while a cycle is in flight.
    pub fn configure(&self, mut descriptor: RequestDescriptor) -> Result<(), EngineError> {
        if let Some(size) = self.shared.config.page_size {
            if descriptor.param(PAGE_SIZE_PARAM).is_none() {
                descriptor.set_param(PAGE_SIZE_PARAM, Some(clamp_page_size(size).to_string()));
            }
        }
        self.shared.with_descriptor(|current| *current = descriptor)
    }

    /// Current request descriptor
    pub fn descriptor(&self) -> RequestDescriptor {
        lock(&self.shared.descriptor).clone()
    }

    /// Set or remove one query parameter
    pub fn set_param(&self, key: impl Into<String>, value: Option<String>) -> Result<(), EngineError> {
        let key = key.into();
        self.shared.with_descriptor(|d| d.set_param(key, value))
    }

    /// Set the page size, clamped to 1..=100; returns the value used
    pub fn set_page_size(&self, size: u32) -> Result<u32, EngineError> {
        let size = clamp_page_size(size);
        self.shared
            .with_descriptor(|d| d.set_param(PAGE_SIZE_PARAM, Some(size.to_string())))?;
        Ok(size)
    }

    /// Spawn the worker (and the periodic trigger, if configured)
    pub fn start(&self) -> Result<(), EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        {
            let mut worker = lock(&self.worker);
            if self.is_running() || worker.as_ref().is_some_and(|h| !h.is_finished()) {
                return Err(EngineError::AlreadyRunning);
            }

            let (stop_tx, stop_rx) = watch::channel(false);
            self.shared.running.store(true, Ordering::SeqCst);
            *lock(&self.stop) = Some(stop_tx);
            *worker = Some(runtime.spawn(worker_loop(self.shared.clone(), stop_rx)));
        }

        if let Some(trigger) = &self.trigger {
            match trigger.start(self.shared.clone()) {
                Ok(()) | Err(EngineError::AlreadyRunning) => {}
                Err(e) => return Err(e),
            }
        }

        info!(engine = %self.shared.name, "Engine started");
        Ok(())
    }

    /// Stop accepting cycles. An in-flight cycle runs to completion.
    pub fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        if let Some(stop) = lock(&self.stop).as_ref() {
            let _ = stop.send(true);
        }
        if let Some(trigger) = &self.trigger {
            trigger.stop();
        }
        if was_running {
            info!(engine = %self.shared.name, "Engine stopping");
        }
    }

    /// Stop and wait for the worker and trigger to exit
    pub async fn shutdown(&self) {
        self.stop();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(engine = %self.shared.name, error = %e, "Worker task ended abnormally");
            }
        }
        if let Some(trigger) = &self.trigger {
            trigger.shutdown().await;
        }
    }

    /// Ask the worker for one request cycle
    pub fn signal(&self) {
        self.shared.gate.signal();
    }

    /// Run one cycle on the calling task instead of the worker
    pub async fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        self.shared.execute_cycle(false).await
    }

    /// Wait until a message is pending or no cycle is in flight or
    /// requested. Polls at the configured interval.
    pub async fn wait_for_result(&self) {
        let poll = self.shared.config.wait_poll_interval();
        while self.pending_count() == 0 && self.is_busy() {
            tokio::time::sleep(poll).await;
        }
    }

    fn is_busy(&self) -> bool {
        self.is_in_progress() || (self.is_running() && self.shared.gate.is_open())
    }

    /// Pop the oldest message; with `flush`, clear the queue instead
    pub fn next_message(&self, flush: bool) -> Option<Message> {
        self.shared.messages.next_message(flush)
    }

    /// Number of buffered messages
    pub fn pending_count(&self) -> usize {
        self.shared.messages.len()
    }

    /// Take every buffered message
    pub fn messages(&self) -> Vec<Message> {
        self.shared.messages.drain()
    }

    /// Messages dropped on a full queue so far
    pub fn dropped_messages(&self) -> u64 {
        self.shared.messages.dropped()
    }

    /// Forward messages to `receiver` instead of buffering them here
    pub fn set_receiver(&self, receiver: Option<Arc<MessageQueue>>) {
        self.shared.messages.set_receiver(receiver);
    }

    /// Newest request record
    pub fn last_request(&self) -> Option<RequestRecord> {
        self.shared.history.last()
    }

    /// Remove and return the newest request record
    pub fn pop_last_request(&self) -> Option<RequestRecord> {
        self.shared.history.pop_last()
    }

    /// All kept request records, oldest first
    pub fn request_history(&self) -> Vec<RequestRecord> {
        self.shared.history.snapshot()
    }

    /// Forget all request records
    pub fn clear_request_history(&self) {
        self.shared.history.clear();
    }

    /// Whether the newest request carried a warning
    pub fn had_warning(&self) -> bool {
        self.last_warning().is_some()
    }

    /// Warning of the newest request
    pub fn last_warning(&self) -> Option<String> {
        self.last_request().and_then(|r| r.warning)
    }

    /// Whether the newest request failed with an error
    pub fn had_error(&self) -> bool {
        self.last_error().is_some()
    }

    /// Error of the newest request
    pub fn last_error(&self) -> Option<serde_json::Value> {
        self.last_request().and_then(|r| r.error)
    }

    /// Latest rate-limit snapshot
    pub fn rate_limit_snapshot(&self) -> Option<RateLimitSnapshot> {
        self.shared.rate_limit_snapshot()
    }

    /// Cursor state of the current or last cycle
    pub fn cursor_state(&self) -> CursorState {
        lock(&self.shared.cursor).clone()
    }

    /// Enable or disable pacing
    pub fn set_throttling(&self, enabled: bool) {
        self.shared.throttling.store(enabled, Ordering::SeqCst);
    }

    /// Whether pacing is enabled
    pub fn throttling(&self) -> bool {
        self.shared.throttling.load(Ordering::SeqCst)
    }

    /// Enable or disable continuation requests
    pub fn set_continuation(&self, enabled: bool) {
        self.shared.continuation.store(enabled, Ordering::SeqCst);
    }

    /// Whether continuation requests are enabled
    pub fn continuation(&self) -> bool {
        self.shared.continuation.load(Ordering::SeqCst)
    }

    /// Route every call through `authenticator`, or back to the plain
    /// transport with `None`
    pub fn set_authenticator(&self, authenticator: Option<Arc<dyn Transport>>) {
        *lock(&self.shared.authenticator) = authenticator;
    }

    /// Whether an authenticator is attached
    pub fn has_authenticator(&self) -> bool {
        lock(&self.shared.authenticator).is_some()
    }

    /// Reset the sessions of the transport and the authenticator
    pub fn reset_transport(&self) {
        self.shared.transport.reset();
        if let Some(auth) = lock(&self.shared.authenticator).as_ref() {
            auth.reset();
        }
    }

    /// Whether the worker accepts cycles
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Whether a cycle is in flight
    pub fn is_in_progress(&self) -> bool {
        self.shared.in_progress.load(Ordering::SeqCst)
    }

    /// Cycles executed so far
    pub fn cycles_completed(&self) -> u64 {
        self.shared.cycles.load(Ordering::SeqCst)
    }

    /// Signals sent by the periodic trigger
    pub fn trigger_fired(&self) -> u64 {
        self.trigger.as_ref().map(PeriodicTrigger::fired).unwrap_or(0)
    }
}

impl Drop for RequestEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builder for [`RequestEngine`]
pub struct EngineBuilder {
    name: Option<String>,
    config: EngineConfig,
    endpoint: Arc<dyn Endpoint>,
    transport: Arc<dyn Transport>,
    descriptor: RequestDescriptor,
    authenticator: Option<Arc<dyn Transport>>,
    receiver: Option<Arc<MessageQueue>>,
}

impl EngineBuilder {
    /// Builder with default configuration
    pub fn new(endpoint: Arc<dyn Endpoint>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: None,
            config: EngineConfig::default(),
            endpoint,
            transport,
            descriptor: RequestDescriptor::default(),
            authenticator: None,
            receiver: None,
        }
    }

    /// Engine name; defaults to the endpoint name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial request descriptor
    pub fn descriptor(mut self, descriptor: RequestDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Auth collaborator used instead of the transport
    pub fn authenticator(mut self, authenticator: Arc<dyn Transport>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Downstream message queue
    pub fn receiver(mut self, receiver: Arc<MessageQueue>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Periodic trigger interval and maximum jitter
    pub fn trigger(mut self, interval: Duration, jitter: Duration) -> Self {
        self.config.timer_interval_ms = Some(interval.as_millis() as u64);
        self.config.timer_jitter_ms = jitter.as_millis() as u64;
        self
    }

    /// Build the engine. Nothing runs until [`RequestEngine::start`].
    pub fn build(self) -> RequestEngine {
        let config = self.config;
        let mut descriptor = self.descriptor;
        if let Some(size) = config.page_size {
            descriptor.set_param(PAGE_SIZE_PARAM, Some(clamp_page_size(size).to_string()));
        }

        let messages = MessageQueue::new(config.max_queue_len);
        messages.set_receiver(self.receiver);

        let trigger = config
            .timer_interval()
            .map(|interval| PeriodicTrigger::new(interval, config.timer_jitter()));

        let shared = EngineShared {
            name: self.name.unwrap_or_else(|| self.endpoint.name().to_string()),
            retry: RetryPolicy::new(config.retry_attempts, self.endpoint.status_table()),
            endpoint: self.endpoint,
            transport: self.transport,
            authenticator: Mutex::new(self.authenticator),
            descriptor: Mutex::new(descriptor),
            rate_limit: Mutex::new(None),
            cursor: Mutex::new(CursorState::default()),
            messages,
            history: PriorRequestLog::new(config.max_prior_requests),
            gate: RequestGate::new(),
            throttle: ThrottleController::new(),
            running: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            idle: Notify::new(),
            throttling: AtomicBool::new(config.throttling),
            continuation: AtomicBool::new(config.continuation),
            cycles: AtomicU64::new(0),
            config,
        };

        RequestEngine {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
            stop: Mutex::new(None),
            trigger,
        }
    }
}
