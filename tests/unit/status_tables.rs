//! Status table presets and custom tables

use std::time::Duration;

use rest_poller::transport::retry::{RATE_LIMIT_WAIT, SERVER_ERROR_WAIT};
use rest_poller::transport::{ErrorKind, RetryPolicy, StatusAction, StatusTable, TransportError};

fn status(code: u16) -> TransportError {
    TransportError::Status {
        status: code,
        body: String::new(),
    }
}

#[test]
fn test_generic_table_classification() {
    let policy = RetryPolicy::new(4, StatusTable::generic());

    assert_eq!(policy.classify(&status(429)), ErrorKind::TransientStatus);
    assert_eq!(policy.classify(&status(500)), ErrorKind::TransientStatus);
    assert_eq!(policy.classify(&status(599)), ErrorKind::TransientStatus);
    assert_eq!(policy.classify(&status(301)), ErrorKind::Redirect);
    assert_eq!(policy.classify(&status(400)), ErrorKind::FatalStatus);
    assert_eq!(policy.classify(&status(404)), ErrorKind::FatalStatus);
}

#[test]
fn test_rate_limited_table_waits() {
    let table = StatusTable::rate_limited();

    assert_eq!(table.action_for(400), StatusAction::retry_after(RATE_LIMIT_WAIT));
    assert_eq!(table.action_for(420), StatusAction::retry_after(Duration::from_secs(360)));
    assert_eq!(table.action_for(403), StatusAction::retry_after(SERVER_ERROR_WAIT));
    assert_eq!(table.action_for(502), StatusAction::retry_after(Duration::from_secs(7)));
    assert_eq!(table.action_for(401), StatusAction::Fatal);
    assert_eq!(table.action_for(404), StatusAction::Fatal);
    assert_eq!(table.action_for(418), StatusAction::Fatal);
}

#[test]
fn test_first_matching_rule_wins() {
    let table = StatusTable::new()
        .status(503, StatusAction::Fatal)
        .range(500, 599, StatusAction::retry_escalating());

    assert_eq!(table.action_for(503), StatusAction::Fatal);
    assert_eq!(table.action_for(500), StatusAction::retry_escalating());
}

#[test]
fn test_non_status_errors() {
    let policy = RetryPolicy::default();

    assert_eq!(
        policy.classify(&TransportError::Connection("timeout".to_string())),
        ErrorKind::TransientTransport
    );
    assert_eq!(policy.classify(&TransportError::UrlRequired), ErrorKind::Configuration);
    assert_eq!(policy.classify(&TransportError::AuthRequired), ErrorKind::AuthRequired);
    assert_eq!(
        policy.classify(&TransportError::Malformed("eof".to_string())),
        ErrorKind::Malformed
    );
    assert!(ErrorKind::TransientTransport.is_retryable());
    assert!(!ErrorKind::FatalStatus.is_retryable());
}

#[test]
fn test_zero_budget_raised_to_one() {
    assert_eq!(RetryPolicy::new(0, StatusTable::generic()).attempts(), 1);
}
