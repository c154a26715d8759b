//! JSON frames exchanged with the server over a message transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name of the subscription request.
pub const START_STREAM_EVENT: &str = "startstream";
/// Event name of the unsubscribe request.
pub const LEAVE_EVENT: &str = "leave";
/// Push event carrying console alerts.
pub const ALERT_EVENT: &str = "alert";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// A named event. Requests carry an `id` and expect an `Ack` with the same id;
    /// pushes from the server carry none.
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        #[serde(default)]
        data: Value,
    },
    Ack {
        id: u64,
        #[serde(default)]
        data: Value,
    },
}
