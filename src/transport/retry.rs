//! Retry policy driven by a declarative status table
//!
//! Every failure is classified into an [`ErrorKind`]:
//! - Connection failures: reset the session and retry at once
//! - Statuses matching a `Retry` rule: sleep (fixed or escalating), then retry
//! - Statuses matching a `Fatal` rule, auth failures, malformed bodies and
//!   configuration errors: give up immediately
//! - Redirect-class statuses without a rule: give up without retrying
//!
//! The attempt budget counts transport calls, so a budget of 4 means at most
//! 4 calls for one logical request.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Transport, TransportError, TransportResponse};
use crate::engine::config::calculate_backoff;
use crate::metrics::{record_retry_backoff, RequestMetrics};
use crate::RequestDescriptor;

/// Default number of transport calls per request
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 4;

/// Wait after a rate-limit style client error (400/420)
pub const RATE_LIMIT_WAIT: Duration = Duration::from_secs(360);

/// Wait after a server error or a 403
pub const SERVER_ERROR_WAIT: Duration = Duration::from_secs(7);

/// Classification of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No response at all
    TransientTransport,
    /// Status listed as retryable
    TransientStatus,
    /// Status listed as fatal, or not listed
    FatalStatus,
    /// Redirect-class status nobody handles
    Redirect,
    /// Body could not be decoded
    Malformed,
    /// Request cannot be sent as configured
    Configuration,
    /// Authentication missing or rejected
    AuthRequired,
}

impl ErrorKind {
    /// Short label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientTransport => "transient_transport",
            Self::TransientStatus => "transient_status",
            Self::FatalStatus => "fatal_status",
            Self::Redirect => "redirect",
            Self::Malformed => "malformed",
            Self::Configuration => "configuration",
            Self::AuthRequired => "auth_required",
        }
    }

    /// Whether another attempt can help
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientTransport | Self::TransientStatus)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    /// Sleep, then retry. With `escalate`, the wait grows exponentially
    /// with each retry instead of using `wait`.
    Retry {
        /// Fixed wait
        wait: Duration,
        /// Use exponential backoff instead of `wait`
        escalate: bool,
    },
    /// Give up
    Fatal,
    /// Not an error we act on; the call just produced nothing
    Unhandled,
}

impl StatusAction {
    /// Fixed-wait retry
    pub const fn retry_after(wait: Duration) -> Self {
        Self::Retry {
            wait,
            escalate: false,
        }
    }

    /// Escalating retry
    pub const fn retry_escalating() -> Self {
        Self::Retry {
            wait: Duration::ZERO,
            escalate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StatusRule {
    from: u16,
    to: u16,
    action: StatusAction,
}

/// Ordered status-range rules; the first match wins.
///
/// Statuses no rule covers are `Unhandled` when redirect-class and `Fatal`
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusTable {
    rules: Vec<StatusRule>,
}

impl StatusTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule for the inclusive range `from..=to`
    pub fn range(mut self, from: u16, to: u16, action: StatusAction) -> Self {
        self.rules.push(StatusRule { from, to, action });
        self
    }

    /// Add a rule for a single status
    pub fn status(self, status: u16, action: StatusAction) -> Self {
        self.range(status, status, action)
    }

    /// Plain REST API: redirects unhandled, 429 and 5xx retried with
    /// escalating backoff, everything else fatal
    pub fn generic() -> Self {
        Self::new()
            .range(300, 399, StatusAction::Unhandled)
            .status(429, StatusAction::retry_escalating())
            .range(500, 599, StatusAction::retry_escalating())
    }

    /// Rate-limited API that signals throttling with 400/420/403
    pub fn rate_limited() -> Self {
        Self::new()
            .range(300, 399, StatusAction::Unhandled)
            .status(400, StatusAction::retry_after(RATE_LIMIT_WAIT))
            .status(420, StatusAction::retry_after(RATE_LIMIT_WAIT))
            .status(403, StatusAction::retry_after(SERVER_ERROR_WAIT))
            .status(429, StatusAction::retry_escalating())
            .status(401, StatusAction::Fatal)
            .status(404, StatusAction::Fatal)
            .range(500, 599, StatusAction::retry_after(SERVER_ERROR_WAIT))
    }

    /// Action for `status`
    pub fn action_for(&self, status: u16) -> StatusAction {
        self.rules
            .iter()
            .find(|rule| (rule.from..=rule.to).contains(&status))
            .map(|rule| rule.action)
            .unwrap_or(if (300..400).contains(&status) {
                StatusAction::Unhandled
            } else {
                StatusAction::Fatal
            })
    }
}

/// Result of running a request under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Final response or last error
    pub result: Result<TransportResponse, TransportError>,
    /// Classification of the last error; `None` on success
    pub kind: Option<ErrorKind>,
    /// Transport calls made
    pub attempts_used: u32,
}

impl RetryOutcome {
    fn success(response: TransportResponse, attempts_used: u32) -> Self {
        Self {
            result: Ok(response),
            kind: None,
            attempts_used,
        }
    }

    fn failure(error: TransportError, kind: ErrorKind, attempts_used: u32) -> Self {
        Self {
            result: Err(error),
            kind: Some(kind),
            attempts_used,
        }
    }

    /// Whether a response came back
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Attempt budget plus status table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    table: StatusTable,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_ATTEMPTS, StatusTable::generic())
    }
}

impl RetryPolicy {
    /// Create a policy; a budget below 1 is raised to 1
    pub fn new(attempts: u32, table: StatusTable) -> Self {
        Self {
            attempts: attempts.max(1),
            table,
        }
    }

    /// Attempt budget
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Status table
    pub fn table(&self) -> &StatusTable {
        &self.table
    }

    /// Classify an error without acting on it
    pub fn classify(&self, error: &TransportError) -> ErrorKind {
        match error {
            TransportError::Connection(_) => ErrorKind::TransientTransport,
            TransportError::Status { status, .. } => match self.table.action_for(*status) {
                StatusAction::Retry { .. } => ErrorKind::TransientStatus,
                StatusAction::Fatal => ErrorKind::FatalStatus,
                StatusAction::Unhandled => ErrorKind::Redirect,
            },
            TransportError::Malformed(_) => ErrorKind::Malformed,
            TransportError::UrlRequired => ErrorKind::Configuration,
            TransportError::AuthRequired => ErrorKind::AuthRequired,
        }
    }

    /// Run `request` through `transport` until it succeeds, fails for good,
    /// or the attempt budget runs out.
    pub async fn execute(
        &self,
        transport: &dyn Transport,
        request: &RequestDescriptor,
        endpoint: &str,
    ) -> RetryOutcome {
        if let Err(reason) = request.validate() {
            warn!(endpoint, %reason, "Request rejected before sending");
            return RetryOutcome::failure(TransportError::UrlRequired, ErrorKind::Configuration, 0);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let metrics = RequestMetrics::start(endpoint, attempt);

            let error = match transport.execute(request).await {
                Ok(response) => {
                    metrics.record_complete(response.status);
                    if attempt > 1 {
                        info!(endpoint, attempt, "Request succeeded after retry");
                    }
                    return RetryOutcome::success(response, attempt);
                }
                Err(error) => error,
            };

            match error.status() {
                Some(status) => metrics.record_complete(status),
                None => metrics.record_network_error(),
            }

            let kind = self.classify(&error);
            let wait = match (&error, kind) {
                (TransportError::Connection(_), _) => {
                    transport.reset();
                    None
                }
                (TransportError::Status { status, .. }, ErrorKind::TransientStatus) => {
                    match self.table.action_for(*status) {
                        StatusAction::Retry { escalate: true, .. } => {
                            Some(calculate_backoff(attempt - 1))
                        }
                        StatusAction::Retry { wait, .. } => Some(wait),
                        _ => None,
                    }
                }
                _ => {
                    match kind {
                        ErrorKind::Redirect => {
                            debug!(endpoint, error = %error, "Redirect status left unhandled")
                        }
                        _ => warn!(endpoint, kind = %kind, error = %error, "Request failed, not retrying"),
                    }
                    return RetryOutcome::failure(error, kind, attempt);
                }
            };

            if attempt >= self.attempts {
                warn!(
                    endpoint,
                    attempts = attempt,
                    kind = %kind,
                    error = %error,
                    "Retry budget exhausted"
                );
                return RetryOutcome::failure(error, kind, attempt);
            }

            warn!(
                "{} on attempt {}/{} for {}: {}",
                kind,
                attempt,
                self.attempts,
                endpoint,
                error
            );

            if let Some(wait) = wait.filter(|w| !w.is_zero()) {
                record_retry_backoff(wait, attempt);
                debug!("Retrying after {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
    }
}
