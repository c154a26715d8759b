//! # WebSocket Transport
//!
//! A resilient client for the stream server's namespace endpoint. Requests and
//! pushes travel as JSON [`Frame`]s in text messages.
//!
//! The connection is owned by one background task:
//! - socket errors and closes are never fatal; the task moves to
//!   [`ConnectionState::Reconnecting`] and retries forever, doubling the delay from
//!   `reconnect_base_delay` up to `reconnect_max_delay`;
//! - when an established session is lost, requests still waiting for an ack fail
//!   with [`StreamError::Disconnected`];
//! - requests issued while disconnected stay queued and go out on the next
//!   connection, unless their ack timeout has already expired.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use super::{ConnectionState, EventHandler, Transport};
use crate::error::{Result, StreamError};
use crate::models::Frame;

/// Connection settings for [`WsTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server base URL, `ws://` or `wss://`.
    pub url: String,
    /// Namespace path appended to the base URL, e.g. `/sl`.
    pub namespace: String,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// How long a request waits for its acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5050".to_string(),
            namespace: "/sl".to_string(),
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(60000),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Base URL with the namespace appended to its path.
    pub fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        let ns = self.namespace.trim_matches('/');
        if !ns.is_empty() {
            let path = format!("{}/{}", url.path().trim_end_matches('/'), ns);
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }
}

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    Shutdown,
    Lost(String),
}

struct Shared {
    handlers: Mutex<HashMap<String, EventHandler>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    next_id: AtomicU64,
    /// Request frames with their ids, in send order.
    outbound: mpsc::UnboundedSender<(u64, String)>,
    state_tx: watch::Sender<ConnectionState>,
    ack_timeout: Duration,
}

impl Shared {
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<Frame>(text) {
            Ok(Frame::Ack { id, data }) => {
                let waiter = self
                    .pending
                    .lock()
                    .expect("Pending lock poisoned")
                    .remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(data));
                    }
                    None => log::debug!("Ack for unknown or expired request {}", id),
                }
            }
            Ok(Frame::Event { event, data, .. }) => {
                let handler = self
                    .handlers
                    .lock()
                    .expect("Handlers lock poisoned")
                    .get(&event)
                    .cloned();
                match handler {
                    Some(h) => h(data),
                    None => log::debug!("No handler for event '{}'", event),
                }
            }
            Err(e) => log::warn!("Unparseable frame from server: {}", e),
        }
    }

    fn is_pending(&self, id: u64) -> bool {
        self.pending
            .lock()
            .expect("Pending lock poisoned")
            .contains_key(&id)
    }

    fn fail_pending(&self) {
        let drained: Vec<_> = self
            .pending
            .lock()
            .expect("Pending lock poisoned")
            .drain()
            .collect();
        if !drained.is_empty() {
            log::warn!("Failing {} unacknowledged request(s)", drained.len());
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(StreamError::Disconnected));
        }
    }
}

pub struct WsTransport {
    shared: Arc<Shared>,
}

impl WsTransport {
    /// Spawns the connection task and returns the transport with the task's handle.
    ///
    /// The task runs until `shutdown` fires (or its sender is dropped). Must be called
    /// from within a Tokio runtime.
    pub fn connect(
        config: TransportConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let endpoint = config.endpoint()?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        let shared = Arc::new(Shared {
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            outbound,
            state_tx,
            ack_timeout: config.ack_timeout,
        });

        let handle = tokio::spawn(run(
            endpoint,
            config,
            Arc::clone(&shared),
            outbound_rx,
            shutdown,
        ));
        Ok((Self { shared }, handle))
    }
}

async fn run(
    endpoint: Url,
    config: TransportConfig,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<(u64, String)>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut attempt: u32 = 0;
    let mut epoch: u64 = 0;

    loop {
        log::info!("Connecting to stream server: {}", endpoint);

        let reason = tokio::select! {
            _ = shutdown.recv() => break,
            conn = connect_async(endpoint.as_str()) => match conn {
                Ok((ws, _)) => {
                    attempt = 0;
                    epoch += 1;
                    log::info!("Connected to stream server (epoch {})", epoch);
                    shared.state_tx.send_replace(ConnectionState::Connected { epoch });

                    match session(ws, &shared, &mut outbound, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            // Frames queued for the dead socket belong to the failed requests.
                            while outbound.try_recv().is_ok() {}
                            shared.fail_pending();
                            reason
                        }
                    }
                }
                Err(e) => e.to_string(),
            },
        };

        attempt = attempt.saturating_add(1);
        let delay = config.backoff(attempt);
        log::warn!(
            "Stream server unavailable: {}. Retrying in {:?} (attempt {})",
            reason,
            delay,
            attempt
        );
        shared
            .state_tx
            .send_replace(ConnectionState::Reconnecting { attempt, reason });

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = sleep(delay) => {}
        }
    }

    shared.fail_pending();
    log::info!("Stream transport shut down.");
}

async fn session(
    ws: Ws,
    shared: &Shared,
    outbound: &mut mpsc::UnboundedReceiver<(u64, String)>,
    shutdown: &mut broadcast::Receiver<()>,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                let _ = write.close().await;
                return SessionEnd::Shutdown;
            }
            Some((id, text)) = outbound.recv() => {
                if !shared.is_pending(id) {
                    log::debug!("Dropping expired request {}", id);
                } else {
                    log::trace!("--> {}", text);
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        return SessionEnd::Lost(format!("send failed: {}", e));
                    }
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    log::trace!("<-- {}", text.as_str());
                    shared.dispatch(text.as_str());
                }
                Some(Ok(Message::Binary(bin))) => match std::str::from_utf8(&bin) {
                    Ok(text) => shared.dispatch(text),
                    Err(_) => log::warn!("Dropping non-UTF-8 binary frame ({} bytes)", bin.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    return SessionEnd::Lost(format!("closed by server: {:?}", frame));
                }
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("stream ended".to_string()),
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn request(&self, event: &str, payload: Value) -> Result<Value> {
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&Frame::Event {
            event: event.to_string(),
            id: Some(id),
            data: payload,
        })?;

        let (tx, rx) = oneshot::channel();
        shared
            .pending
            .lock()
            .expect("Pending lock poisoned")
            .insert(id, tx);

        if shared.outbound.send((id, text)).is_err() {
            shared.pending.lock().expect("Pending lock poisoned").remove(&id);
            return Err(StreamError::TransportClosed);
        }

        match tokio::time::timeout(shared.ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StreamError::TransportClosed),
            Err(_) => {
                shared.pending.lock().expect("Pending lock poisoned").remove(&id);
                Err(StreamError::AckTimeout {
                    event: event.to_string(),
                    timeout: shared.ack_timeout,
                })
            }
        }
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.shared
            .handlers
            .lock()
            .expect("Handlers lock poisoned")
            .insert(event.to_string(), handler);
    }

    fn off(&self, event: &str) {
        self.shared
            .handlers
            .lock()
            .expect("Handlers lock poisoned")
            .remove(event);
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }
}
