//! # lib_stream
//!
//! Client-side ordered record windows kept in sync with a streaming server.
//!
//! A [`WindowStream`] subscribes to a server table over a shared [`Transport`],
//! receives upserts and delete markers on its stream tag, and maintains a bounded,
//! sorted, de-duplicated window of records. A [`StreamRegistry`] resubscribes every
//! live stream when the transport reconnects; an [`AlertBanner`] tells the user while
//! the connection is down.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lib_stream::{StreamConfig, StreamRegistry, WindowStream};
//! use lib_stream::transport::{TransportConfig, WsTransport};
//!
//! # async fn example() -> lib_stream::Result<()> {
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! let (transport, _task) = WsTransport::connect(TransportConfig::default(), shutdown_rx)?;
//! let transport = Arc::new(transport);
//!
//! let registry = Arc::new(StreamRegistry::new());
//! registry.spawn_reconnect_watcher(lib_stream::Transport::connection_state(&*transport));
//!
//! let stream = WindowStream::new(
//!     StreamConfig::new("Packet", "ts", 20, "pkt_stream"),
//!     transport,
//!     Arc::clone(&registry),
//! );
//! stream.on_new_data(|latest| println!("latest: {}", latest));
//! stream.start().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod configs;
pub mod core;
pub mod error;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod models;
pub mod transport;

// Re-export everything commonly needed
pub use crate::core::{
    Alert, AlertBanner, AlertLevel, AlertSource, ApplySummary, OrderedWindow, StreamRegistry,
    WindowStream,
};
pub use error::{Result, StreamError};
pub use models::{Record, RecordKey, StreamBounds, StreamConfig, StreamItem};
pub use transport::{ConnectionState, EventHandler, MemoryTransport, Transport};
