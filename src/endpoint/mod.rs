//! Endpoint strategies
//!
//! An [`Endpoint`] customizes one [`RequestEngine`](crate::RequestEngine)
//! for one API surface: how the request is built, how a decoded payload is
//! turned into messages and pagination hints, which pagination mode applies
//! and which status table drives retries.

use serde_json::Value;

use crate::pagination::PaginationMode;
use crate::transport::StatusTable;
use crate::{Message, RequestDescriptor};

pub mod batch;
pub mod continuation;
pub mod cursor;
pub mod single;

pub use batch::BatchEndpoint;
pub use continuation::ContinuationEndpoint;
pub use cursor::CursorEndpoint;
pub use single::SingleEndpoint;

/// What an endpoint extracted from one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    /// Messages to queue
    pub messages: Vec<Message>,
    /// Error reported inside the payload
    pub api_error: Option<Value>,
    /// Forward cursor
    pub next_cursor: Option<i64>,
    /// Backward cursor
    pub prev_cursor: Option<i64>,
    /// Next-page reference
    pub next_token: Option<String>,
    /// Refresh reference
    pub refresh_url: Option<String>,
}

/// Per-endpoint behaviour plugged into the engine
pub trait Endpoint: Send + Sync {
    /// Name used in logs, metrics and as the default rate-limit resource
    fn name(&self) -> &str;

    /// Pagination mode
    fn pagination(&self) -> PaginationMode;

    /// Request to send for a new cycle, or `None` when there is nothing to ask
    fn build_request(&self, base: &RequestDescriptor) -> Option<RequestDescriptor> {
        Some(base.clone())
    }

    /// Turn a decoded payload into messages and pagination hints
    fn parse_response(&self, payload: Value) -> ParsedPage;

    /// Status table used by the retry policy
    fn status_table(&self) -> StatusTable {
        StatusTable::rate_limited()
    }

    /// Resource key stored on rate-limit snapshots
    fn rate_limit_resource(&self) -> &str {
        self.name()
    }
}

/// Error carried in a payload: the first element of `errors`, or `error`
pub fn api_error(payload: &Value) -> Option<Value> {
    let object = payload.as_object()?;
    if let Some(errors) = object.get("errors") {
        return match errors.as_array() {
            Some(list) => list.first().cloned().or_else(|| Some(errors.clone())),
            None => Some(errors.clone()),
        };
    }
    object.get("error").cloned()
}

/// Whether a payload is worth queueing
pub(crate) fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
