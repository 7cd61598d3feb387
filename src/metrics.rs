//! Prometheus metrics for the polling engine
//!
//! Tracks what an operator needs to see when a poller misbehaves:
//! request outcomes per attempt, retry back-off, throttle pacing, the
//! server-reported quota, dropped messages and worker faults.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate facades, so recording is a no-op until an exporter is installed
//! - Prometheus exporter for the scrape endpoint (e.g. :9090/metrics)
//! - Correlation IDs tie the debug logs of one attempt together

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::engine::CycleReport;
use crate::RateLimitSnapshot;

static METRICS_INITIALIZED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Install the Prometheus exporter on `addr`.
///
/// Idempotent: later calls return `Ok(())` without rebinding.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!("poller_requests_total", Unit::Count, "Transport calls by endpoint, status and attempt");
    describe_histogram!(
        "poller_request_duration_seconds",
        Unit::Seconds,
        "Transport call duration in seconds"
    );
    describe_counter!("poller_rate_limited_total", Unit::Count, "Calls answered with 420 or 429");
    describe_counter!("poller_retries_total", Unit::Count, "Retry waits taken");
    describe_histogram!(
        "poller_retry_backoff_seconds",
        Unit::Seconds,
        "Wait before a retried attempt"
    );
    describe_histogram!(
        "poller_throttle_wait_seconds",
        Unit::Seconds,
        "Pacing delay between consecutive requests"
    );
    describe_gauge!("poller_rate_limit_remaining", Unit::Count, "Requests left in the quota window");
    describe_gauge!(
        "poller_rate_limit_reset_seconds",
        Unit::Seconds,
        "Seconds until the quota window resets"
    );
    describe_counter!("poller_messages_dropped_total", Unit::Count, "Messages dropped on a full queue");
    describe_counter!("poller_cycles_total", Unit::Count, "Request cycles by outcome");
    describe_histogram!("poller_cycle_duration_seconds", Unit::Seconds, "Request cycle duration");
    describe_counter!("poller_worker_faults_total", Unit::Count, "Worker cycles ended by a panic");

    *initialized = true;
    info!("Metrics system initialized on {}", addr);
    Ok(())
}

/// Whether [`init_metrics`] has succeeded
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one transport attempt
pub struct RequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl RequestMetrics {
    /// Start timing an attempt
    pub fn start(endpoint: impl Into<String>, attempt: u32) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            attempt,
            "Starting request"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record an attempt that got a status back
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "poller_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
            "attempt" => self.attempt.to_string(),
        )
        .increment(1);
        histogram!("poller_request_duration_seconds", "endpoint" => self.endpoint.clone())
            .record(duration.as_secs_f64());

        if status_code == 420 || status_code == 429 {
            counter!("poller_rate_limited_total", "endpoint" => self.endpoint.clone()).increment(1);
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                status = status_code,
                attempt = self.attempt,
                "Rate limited"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "Request completed"
        );
    }

    /// Record an attempt that got no response
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "poller_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
            "attempt" => self.attempt.to_string(),
        )
        .increment(1);
        histogram!("poller_request_duration_seconds", "endpoint" => self.endpoint.clone())
            .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Network error"
        );
    }

    /// Correlation ID of this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a retry wait
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("poller_retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("poller_retry_backoff_seconds").record(duration.as_secs_f64());

    debug!(attempt, backoff_ms = duration.as_millis(), "Retry backoff recorded");
}

/// Record a pacing delay
pub fn record_throttle_wait(wait: Duration, mode: &str) {
    histogram!("poller_throttle_wait_seconds", "mode" => mode.to_string()).record(wait.as_secs_f64());
}

/// Record the quota state reported by the server
pub fn record_rate_limit(snapshot: &RateLimitSnapshot) {
    gauge!("poller_rate_limit_remaining", "resource" => snapshot.resource.clone())
        .set(snapshot.remaining as f64);
    gauge!("poller_rate_limit_reset_seconds", "resource" => snapshot.resource.clone())
        .set(snapshot.reset_in_seconds as f64);

    if let Some(limit) = snapshot.limit.filter(|l| *l > 0) {
        let usage_percent = (1.0 - snapshot.remaining as f64 / limit as f64) * 100.0;
        if usage_percent >= 80.0 {
            warn!(
                resource = %snapshot.resource,
                remaining = snapshot.remaining,
                limit,
                "Quota usage exceeds 80% threshold"
            );
        }
    }
}

/// Record a message dropped on a full queue
pub fn record_message_dropped() {
    counter!("poller_messages_dropped_total").increment(1);
}

/// Record a worker panic
pub fn record_worker_fault(engine: &str) {
    counter!("poller_worker_faults_total", "engine" => engine.to_string()).increment(1);
}

/// Timing and outcome of one request cycle
pub struct CycleMetrics {
    engine: String,
    start_time: Instant,
}

impl CycleMetrics {
    /// Start timing a cycle
    pub fn start(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            start_time: Instant::now(),
        }
    }

    /// Record the finished cycle
    pub fn record_complete(&self, report: &CycleReport) {
        let duration = self.start_time.elapsed();
        let outcome = match report.failure {
            Some(kind) => kind.as_str(),
            None if report.requests == 0 => "idle",
            None => "ok",
        };

        counter!(
            "poller_cycles_total",
            "engine" => self.engine.clone(),
            "outcome" => outcome,
        )
        .increment(1);
        histogram!("poller_cycle_duration_seconds", "engine" => self.engine.clone())
            .record(duration.as_secs_f64());

        if report.failure.is_some() {
            error!(
                engine = %self.engine,
                outcome,
                requests = report.requests,
                duration_ms = duration.as_millis(),
                "Request cycle failed"
            );
        }
    }
}
