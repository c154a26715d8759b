//! # Core Module
//!
//! The cache itself and the pieces that keep it alive across a flaky connection.
//!
//! ## Core Components:
//!
//! - **`window`**: The bounded, sorted, de-duplicated record sequence and its
//!   upsert / delete / evict rules.
//!
//! - **`stream`**: One subscription. Sends `startstream`, applies push events to its
//!   window and tells the consumer about new data.
//!
//! - **`registry`**: The set of live subscriptions on a transport. After a reconnect
//!   it resubscribes every one of them.
//!
//! - **`alert`**: The dismissible banner shown while the connection is down.

/// Dismissible connection and server alerts.
pub mod alert;
/// Registry of live subscriptions, resubscribed on reconnect.
pub mod registry;
/// A single subscription feeding an ordered window.
pub mod stream;
/// The ordered, bounded record window.
pub mod window;

// --- Public API Re-exports ---
pub use alert::{Alert, AlertBanner, AlertLevel, AlertSource};
pub use registry::StreamRegistry;
pub use stream::{ApplySummary, NewDataHandler, WindowStream};
pub use window::{Applied, BoundsUpdate, OrderedWindow};
