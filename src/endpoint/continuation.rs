//! Continuation-token endpoint (search style)

use serde_json::Value;

use super::{api_error, Endpoint, ParsedPage};
use crate::pagination::PaginationMode;
use crate::transport::StatusTable;

/// Endpoint whose payload holds an item list plus a `*metadata` object with
/// `next_results` and `refresh_url` references.
///
/// The item list is queued as one message when non-empty.
#[derive(Debug, Clone)]
pub struct ContinuationEndpoint {
    name: String,
    items_field: String,
    table: StatusTable,
}

impl Default for ContinuationEndpoint {
    fn default() -> Self {
        Self::new("search")
    }
}

impl ContinuationEndpoint {
    /// Create with the `statuses` items field
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items_field: "statuses".to_string(),
            table: StatusTable::rate_limited(),
        }
    }

    /// Field holding the item list
    pub fn with_items_field(mut self, field: impl Into<String>) -> Self {
        self.items_field = field.into();
        self
    }

    /// Use a different status table
    pub fn with_status_table(mut self, table: StatusTable) -> Self {
        self.table = table;
        self
    }
}

/// Value of the first key ending in `metadata`
fn metadata(payload: &Value) -> Option<&Value> {
    payload
        .as_object()?
        .iter()
        .find(|(key, _)| key.len() > "metadata".len() && key.ends_with("metadata"))
        .map(|(_, value)| value)
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Endpoint for ContinuationEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn pagination(&self) -> PaginationMode {
        PaginationMode::Continuation
    }

    fn parse_response(&self, payload: Value) -> ParsedPage {
        let api_error = api_error(&payload);
        let (next_token, refresh_url) = match metadata(&payload) {
            Some(meta) => (string_field(meta, "next_results"), string_field(meta, "refresh_url")),
            None => (None, None),
        };

        let messages = match payload.get(&self.items_field) {
            Some(Value::Array(items)) if !items.is_empty() => vec![Value::Array(items.clone())],
            _ => Vec::new(),
        };

        ParsedPage {
            messages,
            api_error,
            next_token,
            refresh_url,
            ..ParsedPage::default()
        }
    }

    fn status_table(&self) -> StatusTable {
        self.table.clone()
    }
}
