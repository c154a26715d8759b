use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::stream_config::StreamBounds;
use crate::error::StreamError;

/// Reply to `startstream`: either an error or the bounds of the new subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartAck {
    Error { error: String },
    Bounds(StreamBounds),
}

impl StartAck {
    pub fn from_value(value: Value) -> Result<Self, StreamError> {
        serde_json::from_value(value.clone()).map_err(|e| {
            StreamError::Malformed(format!("unexpected startstream ack {}: {}", value, e))
        })
    }

    pub fn into_result(self) -> Result<StreamBounds, StreamError> {
        match self {
            StartAck::Error { error } => Err(StreamError::Ack(error)),
            StartAck::Bounds(bounds) => Ok(bounds),
        }
    }
}

/// Reply to `leave`. The server answers `{ "success": true }` or `{ "error": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveAck {
    #[serde(default, alias = "Success")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl LeaveAck {
    pub fn into_result(self) -> Result<(), StreamError> {
        match self.error {
            Some(e) => Err(StreamError::Ack(e)),
            None => Ok(()),
        }
    }
}
