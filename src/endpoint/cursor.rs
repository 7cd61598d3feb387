//! Numeric-cursor endpoint

use serde_json::Value;

use super::{api_error, Endpoint, ParsedPage};
use crate::pagination::{CursorConfig, CursorDirection, PaginationMode};
use crate::transport::StatusTable;

/// Endpoint paging with `next_cursor` / `previous_cursor` fields.
///
/// Each page's whole payload is queued as one message.
#[derive(Debug, Clone)]
pub struct CursorEndpoint {
    name: String,
    cursor: CursorConfig,
    next_field: String,
    prev_field: String,
    table: StatusTable,
}

impl Default for CursorEndpoint {
    fn default() -> Self {
        Self::new("cursor")
    }
}

impl CursorEndpoint {
    /// Forward traversal with the default field and param names
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cursor: CursorConfig::default(),
            next_field: "next_cursor".to_string(),
            prev_field: "previous_cursor".to_string(),
            table: StatusTable::rate_limited(),
        }
    }

    /// Query parameter carrying the cursor
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.cursor.param = param.into();
        self
    }

    /// Traverse backwards
    pub fn with_direction(mut self, direction: CursorDirection) -> Self {
        self.cursor.direction = direction;
        self
    }

    /// Payload fields holding the cursors
    pub fn with_fields(mut self, next: impl Into<String>, prev: impl Into<String>) -> Self {
        self.next_field = next.into();
        self.prev_field = prev.into();
        self
    }

    /// Use a different status table
    pub fn with_status_table(mut self, table: StatusTable) -> Self {
        self.table = table;
        self
    }
}

fn cursor_field(payload: &Value, field: &str) -> Option<i64> {
    let value = payload.get(field)?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

impl Endpoint for CursorEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn pagination(&self) -> PaginationMode {
        PaginationMode::Cursor(self.cursor.clone())
    }

    fn parse_response(&self, payload: Value) -> ParsedPage {
        let api_error = api_error(&payload);
        let next_cursor = cursor_field(&payload, &self.next_field);
        let prev_cursor = cursor_field(&payload, &self.prev_field);
        ParsedPage {
            messages: vec![payload],
            api_error,
            next_cursor,
            prev_cursor,
            ..ParsedPage::default()
        }
    }

    fn status_table(&self) -> StatusTable {
        self.table.clone()
    }
}
