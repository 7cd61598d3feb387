//! Batched lookup endpoint
//!
//! Callers queue lookup keys (names and ids). Each cycle takes up to
//! `max_batch` of them, names first, joins each kind with commas into one
//! parameter, and switches to POST once the batch reaches the POST threshold.

use serde_json::Value;
use std::sync::Mutex;
use tracing::debug;

use super::{api_error, is_empty_payload, Endpoint, ParsedPage};
use crate::pagination::PaginationMode;
use crate::queue::lock;
use crate::transport::StatusTable;
use crate::{Method, RequestDescriptor};

/// Largest batch the API accepts
pub const DEFAULT_MAX_BATCH: usize = 100;

/// Batch size at which a request becomes due
pub const DEFAULT_REQUEST_THRESHOLD: usize = 100;

/// Batch size at which the request switches to POST
pub const DEFAULT_POST_THRESHOLD: usize = 20;

#[derive(Debug, Default)]
struct PendingKeys {
    names: Vec<String>,
    ids: Vec<String>,
}

impl PendingKeys {
    fn len(&self) -> usize {
        self.names.len() + self.ids.len()
    }
}

/// Endpoint batching lookup keys into one request
#[derive(Debug)]
pub struct BatchEndpoint {
    name: String,
    name_param: String,
    id_param: String,
    max_batch: usize,
    request_threshold: usize,
    post_threshold: usize,
    pending: Mutex<PendingKeys>,
    table: StatusTable,
}

impl Default for BatchEndpoint {
    fn default() -> Self {
        Self::new("lookup")
    }
}

impl BatchEndpoint {
    /// Create with `screen_name` / `user_id` params and default thresholds
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_param: "screen_name".to_string(),
            id_param: "user_id".to_string(),
            max_batch: DEFAULT_MAX_BATCH,
            request_threshold: DEFAULT_REQUEST_THRESHOLD,
            post_threshold: DEFAULT_POST_THRESHOLD,
            pending: Mutex::new(PendingKeys::default()),
            table: StatusTable::rate_limited(),
        }
    }

    /// Parameter names for the two key kinds
    pub fn with_params(mut self, name_param: impl Into<String>, id_param: impl Into<String>) -> Self {
        self.name_param = name_param.into();
        self.id_param = id_param.into();
        self
    }

    /// Batch size at which a request is due; outside `1..=max_batch` the
    /// maximum is used
    pub fn with_request_threshold(mut self, threshold: usize) -> Self {
        self.request_threshold = if (1..=self.max_batch).contains(&threshold) {
            threshold
        } else {
            self.max_batch
        };
        self
    }

    /// Batch size at which POST is used; outside `2..max_batch` the default
    /// applies
    pub fn with_post_threshold(mut self, threshold: usize) -> Self {
        self.post_threshold = if threshold > 1 && threshold < self.max_batch {
            threshold
        } else {
            DEFAULT_POST_THRESHOLD
        };
        self
    }

    /// Use a different status table
    pub fn with_status_table(mut self, table: StatusTable) -> Self {
        self.table = table;
        self
    }

    /// Queue names; returns whether a request is now due
    pub fn add_names<I, S>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pending = lock(&self.pending);
        pending.names.extend(names.into_iter().map(Into::into));
        pending.len() >= self.request_threshold
    }

    /// Queue ids; returns whether a request is now due
    pub fn add_ids<I, S>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let mut pending = lock(&self.pending);
        pending.ids.extend(ids.into_iter().map(|id| id.to_string()));
        pending.len() >= self.request_threshold
    }

    /// Keys waiting for a request
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Whether enough keys are queued for a request
    pub fn is_due(&self) -> bool {
        self.pending() >= self.request_threshold
    }
}

impl Endpoint for BatchEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn pagination(&self) -> PaginationMode {
        PaginationMode::Single
    }

    fn build_request(&self, base: &RequestDescriptor) -> Option<RequestDescriptor> {
        let (names, ids) = {
            let mut pending = lock(&self.pending);
            let take = pending.names.len().min(self.max_batch);
            let names: Vec<String> = pending.names.drain(..take).collect();
            let take = pending.ids.len().min(self.max_batch - names.len());
            let ids: Vec<String> = pending.ids.drain(..take).collect();
            (names, ids)
        };

        let count = names.len() + ids.len();
        if count == 0 {
            debug!(endpoint = %self.name, "No keys queued, skipping lookup");
            return None;
        }

        let mut request = base.clone();
        request.set_param(self.name_param.clone(), Some(names.join(",")));
        request.set_param(self.id_param.clone(), Some(ids.join(",")));
        request.set_method(if count >= self.post_threshold {
            Method::Post
        } else {
            Method::Get
        });

        debug!(
            endpoint = %self.name,
            keys = count,
            method = %request.method,
            "Built lookup batch"
        );
        Some(request)
    }

    fn parse_response(&self, payload: Value) -> ParsedPage {
        let api_error = api_error(&payload);
        let messages = if is_empty_payload(&payload) {
            Vec::new()
        } else {
            vec![payload]
        };
        ParsedPage {
            messages,
            api_error,
            ..ParsedPage::default()
        }
    }

    fn status_table(&self) -> StatusTable {
        self.table.clone()
    }
}
