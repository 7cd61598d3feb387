//! Throttling across pages and cycles

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use rest_poller::endpoint::{ContinuationEndpoint, SingleEndpoint};
use rest_poller::transport::TransportResponse;
use rest_poller::{EngineConfig, RequestDescriptor, RequestEngine};

use crate::support::{json_response_with_headers, mock, MockTransport};

fn quota_page(remaining: i64, reset_in: i64) -> TransportResponse {
    json_response_with_headers(
        json!({
            "statuses": [{"id": 1}],
            "search_metadata": {"next_results": "?max_id=1&q=rust"}
        }),
        &[
            ("X-Rate-Limit-Remaining", remaining.to_string()),
            ("X-Rate-Limit-Reset", (Utc::now().timestamp() + reset_in).to_string()),
        ],
    )
}

fn search_engine(dynamic: Arc<dyn rest_poller::transport::Transport>, suspend: bool) -> RequestEngine {
    let config = EngineConfig {
        throttling: true,
        continuation: true,
        continuation_max: 3,
        suspend_throttling_in_burst: suspend,
        ..EngineConfig::default()
    };
    RequestEngine::builder(Arc::new(ContinuationEndpoint::default()), dynamic)
        .config(config)
        .descriptor(RequestDescriptor::get("https://api.example.com/search.json").with_param("q", "rust"))
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_burst_pages_paced_by_quota() {
    // 60 s over 100 requests: 1.6 s between pages
    let (_transport, dynamic) = mock(MockTransport::new().otherwise(Ok(quota_page(100, 60))));
    let engine = search_engine(dynamic, false);

    let started = Instant::now();
    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.requests, 3);
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_suspended_burst_is_not_paced_and_throttling_restored() {
    let (transport, dynamic) = mock(MockTransport::new().otherwise(Ok(quota_page(100, 60))));
    let engine = search_engine(dynamic, true);

    let started = Instant::now();
    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.requests, 3);
    assert_eq!(transport.calls(), 3);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(engine.throttling());
}

#[tokio::test(start_paused = true)]
async fn test_suspension_keeps_throttling_off_when_caller_disabled_it() {
    let (_transport, dynamic) = mock(MockTransport::new().otherwise(Ok(quota_page(100, 60))));
    let engine = search_engine(dynamic, true);
    engine.set_throttling(false);

    engine.run_cycle().await.unwrap();
    assert!(!engine.throttling());
}

#[tokio::test(start_paused = true)]
async fn test_single_request_cycles_paced_between_cycles() {
    // One request left for 30 s: the next request waits out the window
    let (transport, dynamic) = mock(MockTransport::new().otherwise(Ok(quota_page(1, 30))));
    let config = EngineConfig {
        throttling: true,
        ..EngineConfig::default()
    };
    let engine = RequestEngine::builder(Arc::new(SingleEndpoint::new("status")), dynamic)
        .config(config)
        .descriptor(RequestDescriptor::get("https://api.example.com/status.json"))
        .build();

    let started = Instant::now();
    engine.run_cycle().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    let started = Instant::now();
    engine.run_cycle().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(29));
    assert_eq!(transport.calls(), 2);

    // Without throttling nothing is held over
    engine.set_throttling(false);
    let started = Instant::now();
    engine.run_cycle().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}
