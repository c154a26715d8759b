//! # Stream Errors
//!
//! A single error type shared by the window, the streams and the transports.
//! None of these are fatal: the worst outcome of any of them is a stale window.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The server answered a request with `{ "error": ... }`.
    #[error("Server rejected request: {0}")]
    Ack(String),

    #[error("No acknowledgment for '{event}' within {timeout:?}")]
    AckTimeout { event: String, timeout: Duration },

    /// The connection dropped while a request was waiting for its ack.
    #[error("Transport disconnected before the request was acknowledged")]
    Disconnected,

    /// The transport task is gone; nothing will ever be delivered again.
    #[error("Transport is closed")]
    TransportClosed,

    /// A payload that does not have the shape the protocol requires.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Command-line parsing stopped; `--help` and `--version` land here too.
    #[error("Invalid arguments: {0}")]
    Args(#[from] clap::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "ws")]
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),
}
