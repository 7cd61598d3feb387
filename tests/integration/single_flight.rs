//! Single-flight gate and worker behaviour

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use rest_poller::endpoint::SingleEndpoint;
use rest_poller::{EngineConfig, EngineError, RequestDescriptor, RequestEngine};

use crate::support::{json_response, mock, wait_until, MockTransport};

const STEP: Duration = Duration::from_millis(10);

fn engine_over(transport: Arc<dyn rest_poller::transport::Transport>, config: EngineConfig) -> RequestEngine {
    RequestEngine::builder(Arc::new(SingleEndpoint::new("items")), transport)
        .config(config)
        .descriptor(RequestDescriptor::get("https://api.example.com/items.json"))
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_signals_during_cycle_coalesce() {
    let (transport, dynamic) = mock(
        MockTransport::new()
            .with_latency(Duration::from_secs(1))
            .otherwise(Ok(json_response(json!({"n": 1})))),
    );
    let engine = engine_over(dynamic, EngineConfig::default());
    engine.start().unwrap();

    engine.signal();
    wait_until(|| engine.is_in_progress(), STEP, 1000).await;

    // Any number of signals during a cycle collapse into one more cycle
    engine.signal();
    engine.signal();
    engine.signal();

    wait_until(|| engine.cycles_completed() == 2, STEP, 1000).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(engine.cycles_completed(), 2);
    assert_eq!(transport.calls(), 2);
    assert_eq!(transport.max_in_flight(), 1);
    assert_eq!(engine.pending_count(), 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_foreground_calls_rejected_while_busy() {
    let (_transport, dynamic) = mock(
        MockTransport::new()
            .with_latency(Duration::from_secs(1))
            .otherwise(Ok(json_response(json!({"n": 1})))),
    );
    let engine = engine_over(dynamic, EngineConfig::default());
    engine.start().unwrap();
    engine.signal();
    wait_until(|| engine.is_in_progress(), STEP, 1000).await;

    assert_eq!(engine.run_cycle().await, Err(EngineError::Busy));
    assert_eq!(
        engine.configure(RequestDescriptor::get("https://api.example.com/other.json")),
        Err(EngineError::Busy)
    );
    assert_eq!(engine.set_param("q", Some("rust".to_string())), Err(EngineError::Busy));

    engine.wait_for_result().await;
    assert_eq!(engine.pending_count(), 1);
    wait_until(|| !engine.is_in_progress(), STEP, 1000).await;

    assert!(engine
        .configure(RequestDescriptor::get("https://api.example.com/other.json"))
        .is_ok());
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_signal_during_foreground_cycle_is_served_after_it() {
    let (transport, dynamic) = mock(
        MockTransport::new()
            .with_latency(Duration::from_secs(1))
            .otherwise(Ok(json_response(json!({"n": 1})))),
    );
    let engine = engine_over(dynamic, EngineConfig::default());
    engine.start().unwrap();

    let (report, _) = tokio::join!(engine.run_cycle(), async {
        wait_until(|| engine.is_in_progress(), STEP, 1000).await;
        engine.signal();
    });
    assert_eq!(report.unwrap().requests, 1);

    wait_until(|| engine.cycles_completed() == 2, STEP, 1000).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.calls(), 2);
    assert_eq!(transport.max_in_flight(), 1);
    assert_eq!(engine.cycles_completed(), 2);
    assert_eq!(engine.pending_count(), 2);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_result_returns_when_idle() {
    let (transport, dynamic) = mock(MockTransport::new());
    let engine = engine_over(dynamic, EngineConfig::default());
    engine.start().unwrap();

    // Nothing signalled: returns without waiting for anything
    engine.wait_for_result().await;
    assert_eq!(transport.calls(), 0);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_prevents_further_cycles() {
    let (transport, dynamic) = mock(MockTransport::new().otherwise(Ok(json_response(json!({"n": 1})))));
    let engine = engine_over(dynamic, EngineConfig::default());
    engine.start().unwrap();

    engine.signal();
    wait_until(|| engine.cycles_completed() == 1, STEP, 1000).await;

    engine.stop();
    engine.signal();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!engine.is_running());
    assert_eq!(transport.calls(), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_queue_overflow_drops_newest() {
    let (_transport, dynamic) = mock(
        MockTransport::new()
            .then_json(json!({"n": 1}))
            .then_json(json!({"n": 2}))
            .then_json(json!({"n": 3}))
            .then_json(json!({"n": 4}))
            .then_json(json!({"n": 5})),
    );
    let config = EngineConfig {
        max_queue_len: 3,
        ..EngineConfig::default()
    };
    let engine = engine_over(dynamic, config);

    let mut dropped = 0;
    for _ in 0..5 {
        dropped += engine.run_cycle().await.unwrap().dropped;
    }

    assert_eq!(dropped, 2);
    assert_eq!(engine.dropped_messages(), 2);
    assert_eq!(
        engine.messages(),
        vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]
    );
    assert_eq!(engine.next_message(false), None);
}

#[tokio::test]
async fn test_history_evicts_oldest() {
    let (_transport, dynamic) = mock(MockTransport::new().otherwise(Ok(json_response(json!({"ok": true})))));
    let config = EngineConfig {
        max_prior_requests: 2,
        ..EngineConfig::default()
    };
    let engine = engine_over(dynamic, config);

    for page in 1..=3 {
        engine.set_param("page", Some(page.to_string())).unwrap();
        engine.run_cycle().await.unwrap();
    }

    let history = engine.request_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].request.param("page"), Some("2"));
    assert_eq!(history[1].request.param("page"), Some("3"));
    assert!(history.iter().all(|r| r.success == Some(true)));

    let last = engine.pop_last_request().unwrap();
    assert_eq!(last.request.param("page"), Some("3"));
    engine.clear_request_history();
    assert!(engine.last_request().is_none());
}

#[tokio::test]
async fn test_receiver_gets_forwarded_messages() {
    let receiver = Arc::new(rest_poller::queue::MessageQueue::new(10));
    let (_transport, dynamic) = mock(MockTransport::new().otherwise(Ok(json_response(json!({"ok": true})))));
    let engine = RequestEngine::builder(Arc::new(SingleEndpoint::new("items")), dynamic)
        .descriptor(RequestDescriptor::get("https://api.example.com/items.json"))
        .receiver(receiver.clone())
        .build();

    engine.run_cycle().await.unwrap();

    assert_eq!(engine.pending_count(), 0);
    assert_eq!(receiver.len(), 1);

    engine.set_receiver(None);
    engine.run_cycle().await.unwrap();
    assert_eq!(engine.pending_count(), 1);
}

#[tokio::test]
async fn test_flush_clears_queue() {
    let (_transport, dynamic) = mock(MockTransport::new().otherwise(Ok(json_response(json!({"ok": true})))));
    let engine = engine_over(dynamic, EngineConfig::default());
    engine.run_cycle().await.unwrap();
    engine.run_cycle().await.unwrap();

    assert_eq!(engine.pending_count(), 2);
    assert_eq!(engine.next_message(true), None);
    assert_eq!(engine.pending_count(), 0);
}
