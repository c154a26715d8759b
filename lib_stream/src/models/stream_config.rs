use serde::{Deserialize, Serialize};
use serde_json::Value;

/// # Stream Configuration
///
/// Describes one subscription. It is sent verbatim as the `startstream` payload, and
/// the bounds are overwritten with whatever the server acknowledges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Server-side table to read from.
    pub table_name: String,
    /// Record field that supplies the ordering key.
    pub key_field: String,
    /// Optional server-side filter, passed through untouched.
    #[serde(default)]
    pub restrict_by: Value,
    /// Lower bound of the window. `null` when unknown.
    #[serde(default)]
    pub start_key: Value,
    /// Upper bound of the window. `null` when unknown.
    #[serde(default)]
    pub end_key: Value,
    #[serde(default)]
    pub start_item_number: u64,
    /// Maximum number of records kept in the window.
    pub count: usize,
    /// Name of the push event carrying this subscription's updates.
    pub stream_tag: String,
    /// Total size of the server-side result set, as last acknowledged.
    #[serde(default, skip_serializing)]
    pub total_item_count: Option<u64>,
    #[serde(default, skip_serializing)]
    pub at_start: Option<bool>,
    #[serde(default, skip_serializing)]
    pub at_end: Option<bool>,
}

impl StreamConfig {
    pub fn new(
        table_name: impl Into<String>,
        key_field: impl Into<String>,
        count: usize,
        stream_tag: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            key_field: key_field.into(),
            restrict_by: Value::Null,
            start_key: Value::Null,
            end_key: Value::Null,
            start_item_number: 0,
            count,
            stream_tag: stream_tag.into(),
            total_item_count: None,
            at_start: None,
            at_end: None,
        }
    }

    pub fn with_restrict_by(mut self, restrict_by: Value) -> Self {
        self.restrict_by = restrict_by;
        self
    }

    pub fn with_start_key(mut self, start_key: Value) -> Self {
        self.start_key = start_key;
        self
    }

    /// Copies acknowledged bounds into this configuration.
    pub fn apply_bounds(&mut self, bounds: &StreamBounds) {
        self.start_key = bounds.start_key.clone();
        self.end_key = bounds.end_key.clone();
        self.count = bounds.count;
        self.start_item_number = bounds.start_item_number;
        self.total_item_count = Some(bounds.total_item_count);
        self.at_start = bounds.at_start;
        self.at_end = bounds.at_end;
    }
}

/// Bounds reported by a successful `startstream` acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamBounds {
    #[serde(default)]
    pub start_key: Value,
    #[serde(default)]
    pub end_key: Value,
    pub count: usize,
    #[serde(default)]
    pub start_item_number: u64,
    #[serde(default)]
    pub total_item_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_start: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_end: Option<bool>,
}
