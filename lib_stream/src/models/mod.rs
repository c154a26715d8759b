//! # Models
//!
//! Plain data carried between the server, the transports and the windows.

pub mod ack;
pub mod record;
pub mod stream_config;
pub mod wire;

pub use ack::{LeaveAck, StartAck};
pub use record::{Record, RecordKey, StreamItem, DELETE_FIELD};
pub use stream_config::{StreamBounds, StreamConfig};
pub use wire::{Frame, ALERT_EVENT, LEAVE_EVENT, START_STREAM_EVENT};
