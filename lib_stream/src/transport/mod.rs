//! # Transports
//!
//! A transport is a persistent, bidirectional, message-based connection scoped to a
//! namespace. Clients send named requests and await an acknowledgment; the server
//! pushes named events. Many streams share one transport, each listening on its own
//! event name.
//!
//! ## Contained Modules:
//! - **`ws`**: WebSocket client that reconnects forever with exponential backoff.
//! - **`memory`**: In-process transport for tests and embedding, driven by hand.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::Result;

pub mod memory;
#[cfg(feature = "ws")]
pub mod ws;

pub use memory::MemoryTransport;
#[cfg(feature = "ws")]
pub use ws::{TransportConfig, WsTransport};

/// Callback for a push event. Runs on the transport's reader task, one message at a time.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Lifecycle of the underlying connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress.
    Connecting,
    /// Connected. `epoch` counts successful connections, starting at 1.
    Connected { epoch: u64 },
    /// Connection lost; the transport keeps retrying.
    Reconnecting { attempt: u32, reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Emits `event` with `payload` and waits for the server's acknowledgment.
    async fn request(&self, event: &str, payload: Value) -> Result<Value>;

    /// Installs the handler for push events named `event`, replacing any previous one.
    fn on(&self, event: &str, handler: EventHandler);

    /// Removes the handler for `event`.
    fn off(&self, event: &str);

    /// Watch channel following the connection lifecycle.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}
