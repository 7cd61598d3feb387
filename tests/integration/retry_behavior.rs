//! Retry policy as seen through a running engine

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use rest_poller::endpoint::SingleEndpoint;
use rest_poller::transport::{ErrorKind, StatusTable, TransportError};
use rest_poller::{EngineConfig, RequestDescriptor, RequestEngine};

use crate::support::{mock, status_error, MockTransport};

fn engine_over(transport: Arc<dyn rest_poller::transport::Transport>, table: StatusTable) -> RequestEngine {
    RequestEngine::builder(
        Arc::new(SingleEndpoint::new("items").with_status_table(table)),
        transport,
    )
    .config(EngineConfig {
        retry_attempts: 4,
        ..EngineConfig::default()
    })
    .descriptor(RequestDescriptor::get("https://api.example.com/items.json"))
    .build()
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_within_budget_succeed() {
    let (transport, dynamic) = mock(
        MockTransport::new()
            .then_errors(status_error(503), 3)
            .then_json(json!({"ok": true})),
    );
    let engine = engine_over(dynamic, StatusTable::rate_limited());

    let started = tokio::time::Instant::now();
    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.failure, None);
    assert_eq!(transport.calls(), 4);
    assert_eq!(engine.next_message(false), Some(json!({"ok": true})));

    let record = engine.last_request().unwrap();
    assert_eq!(record.success, Some(true));
    assert_eq!(record.attempts, 4);
    assert!(!engine.had_error());

    // Three 7 s server-error waits
    assert!(started.elapsed() >= Duration::from_secs(21));
}

#[tokio::test(start_paused = true)]
async fn test_budget_exhausted_records_failure() {
    let (transport, dynamic) = mock(MockTransport::new().then_errors(status_error(503), 4));
    let engine = engine_over(dynamic, StatusTable::rate_limited());

    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.failure, Some(ErrorKind::TransientStatus));
    assert_eq!(transport.calls(), 4);
    assert_eq!(engine.pending_count(), 0);

    let error = engine.last_error().unwrap();
    assert_eq!(error["status"], json!(503));
    assert_eq!(error["kind"], json!("transient_status"));
    assert_eq!(engine.last_request().unwrap().success, Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_status_not_retried() {
    let (transport, dynamic) = mock(MockTransport::new().then_error(status_error(404)));
    let engine = engine_over(dynamic, StatusTable::rate_limited());

    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.failure, Some(ErrorKind::FatalStatus));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_status_waits_six_minutes() {
    let (transport, dynamic) = mock(
        MockTransport::new()
            .then_error(status_error(420))
            .then_json(json!({"ok": true})),
    );
    let engine = engine_over(dynamic, StatusTable::rate_limited());

    let started = tokio::time::Instant::now();
    engine.run_cycle().await.unwrap();

    assert_eq!(transport.calls(), 2);
    assert!(started.elapsed() >= Duration::from_secs(360));
}

#[tokio::test(start_paused = true)]
async fn test_connection_error_resets_transport() {
    let (transport, dynamic) = mock(
        MockTransport::new()
            .then_error(TransportError::Connection("reset by peer".to_string()))
            .then_json(json!({"ok": true})),
    );
    let engine = engine_over(dynamic, StatusTable::generic());

    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.failure, None);
    assert_eq!(transport.calls(), 2);
    assert_eq!(transport.resets(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_redirect_left_unhandled() {
    let (transport, dynamic) = mock(MockTransport::new().then_error(status_error(302)));
    let engine = engine_over(dynamic, StatusTable::generic());

    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.failure, Some(ErrorKind::Redirect));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_missing_url_is_configuration_error() {
    let (transport, dynamic) = mock(MockTransport::new());
    let engine = RequestEngine::builder(Arc::new(SingleEndpoint::new("items")), dynamic).build();

    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.failure, Some(ErrorKind::Configuration));
    assert_eq!(transport.calls(), 0);
    assert_eq!(engine.last_error().unwrap()["kind"], json!("configuration"));
}

#[tokio::test]
async fn test_authenticator_routes_calls() {
    let (plain, plain_dyn) = mock(MockTransport::new());
    let (auth, auth_dyn) = mock(MockTransport::new().then_json(json!({"ok": true})));
    let engine = engine_over(plain_dyn, StatusTable::generic());

    engine.set_authenticator(Some(auth_dyn));
    assert!(engine.has_authenticator());
    engine.run_cycle().await.unwrap();

    assert_eq!(plain.calls(), 0);
    assert_eq!(auth.calls(), 1);

    engine.reset_transport();
    assert_eq!(plain.resets(), 1);
    assert_eq!(auth.resets(), 1);
}
