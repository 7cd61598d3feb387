//! A panic inside a cycle stops the engine instead of killing the process

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use rest_poller::{RequestDescriptor, RequestEngine};

use crate::support::{mock, wait_until, MockTransport, PanickingEndpoint};

#[tokio::test(start_paused = true)]
async fn test_panic_stops_engine() {
    let (transport, dynamic) = mock(MockTransport::new().then_json(json!({"ok": true})));
    let engine = RequestEngine::builder(Arc::new(PanickingEndpoint), dynamic)
        .descriptor(RequestDescriptor::get("https://api.example.com/items.json"))
        .build();

    engine.start().unwrap();
    engine.signal();
    wait_until(|| !engine.is_running(), Duration::from_millis(10), 1000).await;

    assert!(!engine.is_in_progress());
    assert_eq!(transport.calls(), 1);

    let record = engine.last_request().unwrap();
    assert_eq!(record.success, Some(false));
    assert_eq!(record.error.unwrap()["kind"], json!("worker_fault"));

    // No restart on its own
    engine.signal();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.calls(), 1);

    engine.shutdown().await;
}
