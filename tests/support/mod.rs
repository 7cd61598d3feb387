//! Shared test doubles

#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rest_poller::endpoint::{Endpoint, ParsedPage};
use rest_poller::pagination::PaginationMode;
use rest_poller::transport::{Transport, TransportError, TransportResponse, TransportResult};
use rest_poller::RequestDescriptor;

/// 200 response with a JSON body
pub fn json_response(body: Value) -> TransportResponse {
    TransportResponse::new(200, HeaderMap::new(), body.to_string())
}

/// 200 response with a JSON body and extra headers
pub fn json_response_with_headers(body: Value, headers: &[(&str, String)]) -> TransportResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).expect("valid header name");
        let value = HeaderValue::from_str(value).expect("valid header value");
        map.insert(name, value);
    }
    TransportResponse::new(200, map, body.to_string())
}

/// Non-success status
pub fn status_error(status: u16) -> TransportError {
    TransportError::Status {
        status,
        body: String::new(),
    }
}

/// Transport replaying a script of results, then a fallback
pub struct MockTransport {
    script: Mutex<VecDeque<TransportResult<TransportResponse>>>,
    fallback: Mutex<Option<TransportResult<TransportResponse>>>,
    latency: Mutex<Duration>,
    requests: Mutex<Vec<RequestDescriptor>>,
    calls: AtomicUsize,
    resets: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            latency: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn then(self, result: TransportResult<TransportResponse>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn then_json(self, body: Value) -> Self {
        self.then(Ok(json_response(body)))
    }

    pub fn then_error(self, error: TransportError) -> Self {
        self.then(Err(error))
    }

    pub fn then_errors(mut self, error: TransportError, times: usize) -> Self {
        for _ in 0..times {
            self = self.then_error(error.clone());
        }
        self
    }

    /// Result returned once the script is exhausted
    pub fn otherwise(self, result: TransportResult<TransportResponse>) -> Self {
        *self.fallback.lock().unwrap() = Some(result);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &RequestDescriptor) -> TransportResult<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let result = next.unwrap_or_else(|| {
            self.fallback
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(TransportError::Connection("script exhausted".to_string())))
        });

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Endpoint whose response parsing panics
pub struct PanickingEndpoint;

impl Endpoint for PanickingEndpoint {
    fn name(&self) -> &str {
        "panicking"
    }

    fn pagination(&self) -> PaginationMode {
        PaginationMode::Single
    }

    fn parse_response(&self, _payload: Value) -> ParsedPage {
        panic!("parser blew up");
    }
}

/// Shared handle plus the trait object the engine builder takes
pub fn mock(transport: MockTransport) -> (Arc<MockTransport>, Arc<dyn Transport>) {
    let transport = Arc::new(transport);
    let dynamic: Arc<dyn Transport> = transport.clone();
    (transport, dynamic)
}

/// Poll `condition` until it holds, failing the test after `limit` steps
pub async fn wait_until(mut condition: impl FnMut() -> bool, step: Duration, limit: usize) {
    for _ in 0..limit {
        if condition() {
            return;
        }
        tokio::time::sleep(step).await;
    }
    panic!("condition not met after {limit} steps of {step:?}");
}
