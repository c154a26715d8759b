//! # Stream Registry
//!
//! Tracks the streams that are currently subscribed on a transport, keyed by
//! `stream_tag`. It is owned by the application root and handed to every
//! [`WindowStream`], so several independent transports (and tests) never share it.
//!
//! Entries are weak: dropping the last handle to a stream retires it, and
//! [`WindowStream::stop`] removes it explicitly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::stream::WindowStream;
use crate::transport::ConnectionState;

#[derive(Default)]
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, Weak<WindowStream>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, stream_tag: &str, stream: Weak<WindowStream>) {
        let mut streams = self.streams.lock().expect("Registry lock poisoned");
        if streams.insert(stream_tag.to_string(), stream).is_none() {
            log::debug!("Stream '{}' registered", stream_tag);
        }
    }

    /// Removes `stream_tag`, but only if it still belongs to `stream`.
    pub fn unregister(&self, stream_tag: &str, stream: &Arc<WindowStream>) {
        let mut streams = self.streams.lock().expect("Registry lock poisoned");
        let owned = streams
            .get(stream_tag)
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(stream)));
        if owned {
            streams.remove(stream_tag);
            log::debug!("Stream '{}' unregistered", stream_tag);
        }
    }

    /// Tags of the registered streams, sorted.
    pub fn tags(&self) -> Vec<String> {
        let streams = self.streams.lock().expect("Registry lock poisoned");
        let mut tags: Vec<String> = streams.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.streams.lock().expect("Registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live streams. Entries whose stream has been dropped are pruned on the way.
    pub fn active(&self) -> Vec<Arc<WindowStream>> {
        let mut streams = self.streams.lock().expect("Registry lock poisoned");
        streams.retain(|tag, w| {
            let alive = w.strong_count() > 0;
            if !alive {
                log::debug!("Pruning dropped stream '{}'", tag);
            }
            alive
        });
        streams.values().filter_map(Weak::upgrade).collect()
    }

    /// Re-issues `start` for every live stream with its current configuration.
    ///
    /// Fire-and-forget: one task per stream, none waits for another's ack, so acks may
    /// come back in any order. The handles are returned for callers that want to join.
    pub fn resubscribe_all(&self) -> Vec<JoinHandle<()>> {
        let streams = self.active();
        log::info!("Resubscribing {} stream(s)", streams.len());
        spawn_starts(streams)
    }

    /// Like [`resubscribe_all`], but skips streams whose `startstream` is still waiting
    /// for an ack: their request is queued and goes out with the connection.
    ///
    /// [`resubscribe_all`]: StreamRegistry::resubscribe_all
    pub fn resubscribe_idle(&self) -> Vec<JoinHandle<()>> {
        let streams: Vec<_> = self
            .active()
            .into_iter()
            .filter(|s| !s.is_starting())
            .collect();
        if !streams.is_empty() {
            log::info!("Starting {} stream(s) left unsubscribed", streams.len());
        }
        spawn_starts(streams)
    }

    /// Watches a transport and resubscribes after each reconnect.
    ///
    /// Every `Connected` state with a new epoch above 1 resubscribes all streams. The
    /// first connection only starts streams whose earlier start gave up before the
    /// socket came up. The task ends with the transport.
    pub fn spawn_reconnect_watcher(
        self: &Arc<Self>,
        mut state_rx: watch::Receiver<ConnectionState>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut last_epoch = match &*state_rx.borrow_and_update() {
                ConnectionState::Connected { epoch } => *epoch,
                _ => 0,
            };

            while state_rx.changed().await.is_ok() {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected { epoch } if epoch != last_epoch => {
                        if epoch > 1 {
                            log::info!("Transport reconnected (epoch {})", epoch);
                            registry.resubscribe_all();
                        } else {
                            registry.resubscribe_idle();
                        }
                        last_epoch = epoch;
                    }
                    ConnectionState::Connected { .. } => {}
                    ConnectionState::Reconnecting { attempt, reason } => {
                        log::debug!("Transport down (attempt {}): {}", attempt, reason);
                    }
                    ConnectionState::Connecting => {}
                }
            }
            log::debug!("Reconnect watcher finished");
        })
    }
}

fn spawn_starts(streams: Vec<Arc<WindowStream>>) -> Vec<JoinHandle<()>> {
    streams
        .into_iter()
        .map(|stream| {
            tokio::spawn(async move {
                if let Err(e) = stream.start().await {
                    log::error!("Resubscribe of '{}' failed: {}", stream.stream_tag(), e);
                }
            })
        })
        .collect()
}
