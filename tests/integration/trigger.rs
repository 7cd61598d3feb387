//! Periodic trigger driving an engine

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use rest_poller::endpoint::SingleEndpoint;
use rest_poller::{RequestDescriptor, RequestEngine};

use crate::support::{json_response, mock, MockTransport};

#[tokio::test(start_paused = true)]
async fn test_trigger_runs_cycles_on_interval() {
    let (transport, dynamic) = mock(MockTransport::new().otherwise(Ok(json_response(json!({"ok": true})))));
    let engine = RequestEngine::builder(Arc::new(SingleEndpoint::new("timeline")), dynamic)
        .descriptor(RequestDescriptor::get("https://api.example.com/timeline.json"))
        .trigger(Duration::from_secs(60), Duration::ZERO)
        .build();

    engine.start().unwrap();
    tokio::time::sleep(Duration::from_secs(130)).await;

    assert_eq!(engine.trigger_fired(), 2);
    assert_eq!(engine.cycles_completed(), 2);
    assert_eq!(transport.calls(), 2);
    assert_eq!(engine.messages().len(), 2);

    engine.shutdown().await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_with_jitter_stays_in_bounds() {
    let (transport, dynamic) = mock(MockTransport::new().otherwise(Ok(json_response(json!({"ok": true})))));
    let engine = RequestEngine::builder(Arc::new(SingleEndpoint::new("timeline")), dynamic)
        .descriptor(RequestDescriptor::get("https://api.example.com/timeline.json"))
        .trigger(Duration::from_secs(60), Duration::from_secs(10))
        .build();

    engine.start().unwrap();

    // Earliest possible first fire is at 50 s
    tokio::time::sleep(Duration::from_secs(49)).await;
    assert_eq!(transport.calls(), 0);

    // Latest possible first fire is at 70 s
    tokio::time::sleep(Duration::from_secs(22)).await;
    assert_eq!(transport.calls(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_shutdown() {
    let (transport, dynamic) = mock(MockTransport::new().otherwise(Ok(json_response(json!({"ok": true})))));
    let engine = RequestEngine::builder(Arc::new(SingleEndpoint::new("timeline")), dynamic)
        .descriptor(RequestDescriptor::get("https://api.example.com/timeline.json"))
        .trigger(Duration::from_secs(60), Duration::ZERO)
        .build();

    engine.start().unwrap();
    engine.shutdown().await;
    engine.start().unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(transport.calls(), 1);
    engine.shutdown().await;
}
