//! One request, whole payload as one message

use serde_json::Value;

use super::{api_error, is_empty_payload, Endpoint, ParsedPage};
use crate::pagination::PaginationMode;
use crate::transport::StatusTable;

/// Endpoint that queues each non-empty payload as a single message
#[derive(Debug, Clone)]
pub struct SingleEndpoint {
    name: String,
    table: StatusTable,
}

impl Default for SingleEndpoint {
    fn default() -> Self {
        Self::new("single")
    }
}

impl SingleEndpoint {
    /// Create with the rate-limited status table
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: StatusTable::rate_limited(),
        }
    }

    /// Use a different status table
    pub fn with_status_table(mut self, table: StatusTable) -> Self {
        self.table = table;
        self
    }
}

impl Endpoint for SingleEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn pagination(&self) -> PaginationMode {
        PaginationMode::Single
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
