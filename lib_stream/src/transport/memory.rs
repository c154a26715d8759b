//! # In-Memory Transport
//!
//! A transport with no socket behind it. Requests are answered synchronously by a
//! responder closure, pushes are delivered with [`MemoryTransport::push`], and the
//! connection lifecycle is driven by [`MemoryTransport::drop_connection`] and
//! [`MemoryTransport::reconnect`]. Every request is recorded so callers can assert on
//! what went over the wire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

use super::{ConnectionState, EventHandler, Transport};
use crate::error::{Result, StreamError};

/// Produces the acknowledgment for a request: `(event, payload) -> ack`.
pub type Responder = Arc<dyn Fn(&str, &Value) -> Value + Send + Sync>;

pub struct MemoryTransport {
    handlers: Mutex<HashMap<String, EventHandler>>,
    sent: Mutex<Vec<(String, Value)>>,
    responder: Mutex<Responder>,
    state_tx: watch::Sender<ConnectionState>,
    epoch: AtomicU64,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A connected transport that acknowledges every request with `{ "success": true }`.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connected { epoch: 1 });
        Self {
            handlers: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            responder: Mutex::new(Arc::new(|_: &str, _: &Value| json!({ "success": true }))),
            state_tx,
            epoch: AtomicU64::new(1),
        }
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
    {
        let transport = Self::new();
        transport.set_responder(responder);
        transport
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
    {
        *self.responder.lock().expect("MemoryTransport lock poisoned") = Arc::new(responder);
    }

    /// Delivers a push event. Returns `false` when nobody listens on `event`.
    pub fn push(&self, event: &str, data: Value) -> bool {
        let handler = self
            .handlers
            .lock()
            .expect("MemoryTransport lock poisoned")
            .get(event)
            .cloned();
        match handler {
            Some(h) => {
                h(data);
                true
            }
            None => {
                log::debug!("No handler for pushed event '{}'", event);
                false
            }
        }
    }

    pub fn has_handler(&self, event: &str) -> bool {
        self.handlers
            .lock()
            .expect("MemoryTransport lock poisoned")
            .contains_key(event)
    }

    /// Every request sent so far, oldest first.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.sent.lock().expect("MemoryTransport lock poisoned").clone()
    }

    /// Payloads of the requests named `event`, oldest first.
    pub fn requests_for(&self, event: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|(e, _)| e == event)
            .map(|(_, p)| p)
            .collect()
    }

    pub fn drop_connection(&self, reason: &str) {
        self.state_tx.send_replace(ConnectionState::Reconnecting {
            attempt: 1,
            reason: reason.to_string(),
        });
    }

    /// Marks the transport connected again under a new epoch.
    pub fn reconnect(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state_tx.send_replace(ConnectionState::Connected { epoch });
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn request(&self, event: &str, payload: Value) -> Result<Value> {
        let connected = self.state_tx.borrow().is_connected();
        if !connected {
            return Err(StreamError::Disconnected);
        }
        self.sent
            .lock()
            .expect("MemoryTransport lock poisoned")
            .push((event.to_string(), payload.clone()));
        let responder = self
            .responder
            .lock()
            .expect("MemoryTransport lock poisoned")
            .clone();
        Ok(responder(event, &payload))
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .expect("MemoryTransport lock poisoned")
            .insert(event.to_string(), handler);
    }

    fn off(&self, event: &str) {
        self.handlers
            .lock()
            .expect("MemoryTransport lock poisoned")
            .remove(event);
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn records_requests_and_answers_with_responder() {
        let t = MemoryTransport::with_responder(|event, _| json!({ "echo": event }));
        let ack = t.request("startstream", json!({"a": 1})).await.unwrap();
        assert_eq!(ack, json!({"echo": "startstream"}));
        assert_eq!(t.requests_for("startstream"), vec![json!({"a": 1})]);
    }

    #[tokio::test]
    async fn refuses_requests_while_disconnected() {
        let t = MemoryTransport::new();
        t.drop_connection("test");
        assert!(matches!(
            t.request("startstream", json!({})).await,
            Err(StreamError::Disconnected)
        ));
        t.reconnect();
        assert_eq!(*t.connection_state().borrow(), ConnectionState::Connected { epoch: 2 });
        assert!(t.request("startstream", json!({})).await.is_ok());
    }

    #[test]
    fn push_reaches_registered_handler_only() {
        let t = MemoryTransport::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        t.on("tag", Arc::new(move |_: Value| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(t.push("tag", json!({})));
        assert!(!t.push("other", json!({})));
        t.off("tag");
        assert!(!t.push("tag", json!({})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
