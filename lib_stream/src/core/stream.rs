//! # Window Stream
//!
//! One subscription: a stream configuration, the [`OrderedWindow`] it feeds, and the
//! push handler that keeps the window current. Streams share a transport and find
//! each other only through the [`StreamRegistry`].
//!
//! ## Lifecycle
//!
//! 1.  [`WindowStream::start`] installs the push handler under `stream_tag`, registers
//!     the stream, sends `startstream` and stores the acknowledged bounds. The window
//!     is kept as is, so the same call resumes a subscription after a reconnect.
//! 2.  Push events go through [`WindowStream::apply_event`].
//! 3.  [`WindowStream::restart`] drops the cached records and starts over with a new
//!     configuration.
//! 4.  [`WindowStream::stop`] sends `leave` and detaches from transport and registry.

use std::sync::{Arc, Mutex, Weak};

use serde_json::{json, Value};

use super::registry::StreamRegistry;
use super::window::{Applied, OrderedWindow};
use crate::error::Result;
use crate::models::{
    LeaveAck, Record, RecordKey, StartAck, StreamBounds, StreamConfig, StreamItem, LEAVE_EVENT,
    START_STREAM_EVENT,
};
use crate::transport::{EventHandler, Transport};

/// Called once per push event with the last item of the batch.
pub type NewDataHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Counts of what one push event did to the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub inserted: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub ignored: usize,
    pub evicted: usize,
    /// Items dropped because they were not objects or had no key field.
    pub rejected: usize,
}

impl ApplySummary {
    fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Inserted { evicted } => {
                self.inserted += 1;
                if evicted {
                    self.evicted += 1;
                }
            }
            Applied::Replaced => self.replaced += 1,
            Applied::Deleted => self.deleted += 1,
            Applied::Ignored => self.ignored += 1,
        }
    }
}

struct StreamState {
    config: StreamConfig,
    window: OrderedWindow,
    /// Bumped by every restart so that a late ack for an old configuration is dropped.
    generation: u64,
    /// Event name the push handler is currently installed under.
    attached_tag: Option<String>,
    starts_in_flight: usize,
}

struct Shared {
    state: Mutex<StreamState>,
    on_new_data: Mutex<Option<NewDataHandler>>,
}

impl Shared {
    fn apply_event(&self, payload: Value) -> ApplySummary {
        let items = match payload {
            Value::Array(items) => items,
            single => vec![single],
        };

        let mut summary = ApplySummary::default();
        let mut last: Option<Value> = None;
        {
            let mut state = self.state.lock().expect("Stream state lock poisoned");
            let capacity = state.config.count;
            let key_field = state.config.key_field.clone();

            for raw in items {
                let item = match StreamItem::classify(raw, &key_field) {
                    Ok(item) => item,
                    Err(reason) => {
                        log::warn!(
                            "Rejected item on stream '{}': {}",
                            state.config.stream_tag,
                            reason
                        );
                        summary.rejected += 1;
                        continue;
                    }
                };

                last = Some(item.to_value());
                let start_key = RecordKey(state.config.start_key.clone());
                let (applied, bounds) = state.window.apply(item, capacity, &start_key);
                if let Some(k) = bounds.start_key {
                    state.config.start_key = k.into_value();
                }
                if let Some(k) = bounds.end_key {
                    state.config.end_key = k.into_value();
                }
                summary.record(applied);
            }

            log::trace!(
                "Stream '{}' applied {:?}, window size {}",
                state.config.stream_tag,
                summary,
                state.window.len()
            );
        }

        // Invoked without the state lock so the callback may read the window.
        if let Some(last) = last {
            let callback = self
                .on_new_data
                .lock()
                .expect("Stream callback lock poisoned")
                .clone();
            if let Some(cb) = callback {
                cb(&last);
            }
        }

        summary
    }
}

pub struct WindowStream {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    registry: Arc<StreamRegistry>,
}

impl WindowStream {
    /// Creates an idle stream with an empty window. Nothing is sent until [`start`].
    ///
    /// [`start`]: WindowStream::start
    pub fn new(
        config: StreamConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<StreamRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StreamState {
                    config,
                    window: OrderedWindow::new(),
                    generation: 0,
                    attached_tag: None,
                    starts_in_flight: 0,
                }),
                on_new_data: Mutex::new(None),
            }),
            transport,
            registry,
        })
    }

    /// Sets the "new data" notification, replacing any previous one.
    pub fn on_new_data<F>(&self, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        *self
            .shared
            .on_new_data
            .lock()
            .expect("Stream callback lock poisoned") = Some(Arc::new(callback));
    }

    /// Snapshot of the current configuration, bounds included.
    pub fn config(&self) -> StreamConfig {
        self.lock_state().config.clone()
    }

    pub fn stream_tag(&self) -> String {
        self.lock_state().config.stream_tag.clone()
    }

    /// The cached records, in key order.
    pub fn records(&self) -> Vec<Record> {
        self.lock_state().window.snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock_state().window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().window.is_empty()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, StreamState> {
        self.shared.state.lock().expect("Stream state lock poisoned")
    }

    /// Subscribes (or resubscribes) with the current configuration.
    ///
    /// On an error acknowledgment the configuration and the window are left as they
    /// were and the error is returned; no retry is attempted. If the acknowledged
    /// `count` is smaller than the cached window, the lowest positions are evicted.
    pub async fn start(self: &Arc<Self>) -> Result<StreamBounds> {
        let (config, generation) = {
            let mut state = self.lock_state();
            state.starts_in_flight += 1;
            (state.config.clone(), state.generation)
        };

        self.attach(&config.stream_tag);
        self.registry
            .register(&config.stream_tag, Arc::downgrade(self));

        log::debug!(
            "startstream --> table '{}' tag '{}' start_key {} count {}",
            config.table_name,
            config.stream_tag,
            config.start_key,
            config.count
        );
        let result = self.request_start(&config).await;

        let mut state = self.lock_state();
        state.starts_in_flight -= 1;
        let bounds = result?;
        if state.generation != generation {
            log::debug!(
                "Dropping startstream ack for '{}': stream was restarted meanwhile",
                config.stream_tag
            );
            return Ok(bounds);
        }

        state.config.apply_bounds(&bounds);
        let capacity = state.config.count;
        if state.window.evict_to(capacity) > 0 {
            if let Some(first) = state.window.first_key() {
                state.config.start_key = first.as_value().clone();
            }
        }
        log::info!(
            "Stream '{}' started: keys {}..{}, {} of {} items",
            state.config.stream_tag,
            bounds.start_key,
            bounds.end_key,
            bounds.count,
            bounds.total_item_count
        );
        Ok(bounds)
    }

    async fn request_start(&self, config: &StreamConfig) -> Result<StreamBounds> {
        let payload = serde_json::to_value(config)?;
        let ack = self.transport.request(START_STREAM_EVENT, payload).await?;
        StartAck::from_value(ack)?.into_result()
    }

    /// True while a `startstream` request of this stream waits for its ack.
    pub fn is_starting(&self) -> bool {
        self.lock_state().starts_in_flight > 0
    }

    /// Discards the cached records and starts again with `config`.
    pub async fn restart(self: &Arc<Self>, config: StreamConfig) -> Result<StreamBounds> {
        let old_tag = {
            let mut state = self.lock_state();
            state.window.clear();
            state.generation += 1;
            std::mem::replace(&mut state.config, config).stream_tag
        };
        log::info!("Restarting stream '{}'", old_tag);
        self.registry.unregister(&old_tag, self);
        self.start().await
    }

    /// Applies one push payload: a single item or an array of items.
    pub fn apply_event(&self, payload: Value) -> ApplySummary {
        self.shared.apply_event(payload)
    }

    /// Unsubscribes: sends `leave`, removes the push handler and the registry entry.
    /// The cached records stay readable.
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        let (table_name, stream_tag) = {
            let mut state = self.lock_state();
            if let Some(tag) = state.attached_tag.take() {
                self.transport.off(&tag);
            }
            (state.config.table_name.clone(), state.config.stream_tag.clone())
        };
        self.registry.unregister(&stream_tag, self);

        log::debug!("leave --> table '{}' tag '{}'", table_name, stream_tag);
        let ack = self
            .transport
            .request(
                LEAVE_EVENT,
                json!({ "table_name": table_name, "stream_tag": stream_tag }),
            )
            .await?;
        serde_json::from_value::<LeaveAck>(ack)?.into_result()
    }

    /// Installs the push handler under `tag`, moving it if it sits under another name.
    fn attach(&self, tag: &str) {
        let mut state = self.lock_state();
        if state.attached_tag.as_deref() == Some(tag) {
            return;
        }
        if let Some(old) = state.attached_tag.take() {
            self.transport.off(&old);
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let handler: EventHandler = Arc::new(move |payload: Value| {
            if let Some(shared) = weak.upgrade() {
                shared.apply_event(payload);
            }
        });
        self.transport.on(tag, handler);
        state.attached_tag = Some(tag.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::transport::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(count: usize) -> StreamConfig {
        StreamConfig::new("Packet", "k", count, "pkt_tag")
    }

    fn bounds_ack(start: Value, end: Value, count: usize, total: u64) -> Value {
        json!({
            "start_key": start, "end_key": end, "count": count,
            "start_item_number": 0, "total_item_count": total
        })
    }

    fn keys(stream: &WindowStream) -> Vec<Value> {
        stream
            .records()
            .iter()
            .map(|r| r.get("k").cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn setup(count: usize) -> (Arc<MemoryTransport>, Arc<StreamRegistry>, Arc<WindowStream>) {
        let transport = Arc::new(MemoryTransport::with_responder(move |event, payload| {
            if event == START_STREAM_EVENT {
                bounds_ack(payload["start_key"].clone(), json!(null), payload["count"].as_u64().unwrap_or(0) as usize, 0)
            } else {
                json!({ "success": true })
            }
        }));
        let registry = Arc::new(StreamRegistry::new());
        let stream = WindowStream::new(config(count), transport.clone(), Arc::clone(&registry));
        (transport, registry, stream)
    }

    #[tokio::test]
    async fn ack_bounds_land_in_config_with_empty_window() {
        let transport = Arc::new(MemoryTransport::with_responder(|_, _| {
            bounds_ack(json!(1), json!(1), 0, 0)
        }));
        let registry = Arc::new(StreamRegistry::new());
        let stream = WindowStream::new(config(20), transport.clone(), registry);

        let bounds = stream.start().await.unwrap();
        assert_eq!(bounds.count, 0);

        let cfg = stream.config();
        assert_eq!(cfg.start_key, json!(1));
        assert_eq!(cfg.end_key, json!(1));
        assert_eq!(cfg.count, 0);
        assert_eq!(cfg.total_item_count, Some(0));
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn start_sends_configuration_and_listens_on_tag() {
        let (transport, registry, stream) = setup(10);
        stream.start().await.unwrap();

        let sent = transport.requests_for(START_STREAM_EVENT);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["table_name"], json!("Packet"));
        assert_eq!(sent[0]["key_field"], json!("k"));
        assert_eq!(sent[0]["stream_tag"], json!("pkt_tag"));
        assert!(sent[0].get("total_item_count").is_none());
        assert!(transport.has_handler("pkt_tag"));
        assert_eq!(registry.tags(), vec!["pkt_tag".to_string()]);
    }

    #[tokio::test]
    async fn pushes_update_the_window() {
        let (transport, _registry, stream) = setup(10);
        stream.start().await.unwrap();

        transport.push("pkt_tag", json!([{"k": 3}, {"k": 1}, {"k": 2}]));
        transport.push("pkt_tag", json!({"_del_key": 2}));
        assert_eq!(keys(&stream), vec![json!(1), json!(3)]);
    }

    #[tokio::test]
    async fn error_ack_leaves_state_untouched() {
        let transport = Arc::new(MemoryTransport::with_responder(|_, _| {
            json!({ "error": "Table Packet not found" })
        }));
        let registry = Arc::new(StreamRegistry::new());
        let stream = WindowStream::new(config(5), transport.clone(), registry);
        stream.apply_event(json!([{"k": 1}, {"k": 2}]));
        let before = stream.config();

        let err = stream.start().await.unwrap_err();
        assert!(matches!(err, StreamError::Ack(ref m) if m == "Table Packet not found"));
        assert_eq!(stream.config(), before);
        assert_eq!(keys(&stream), vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn restart_clears_window_and_moves_handler() {
        let (transport, registry, stream) = setup(10);
        stream.start().await.unwrap();
        transport.push("pkt_tag", json!([{"k": 1}, {"k": 2}]));

        let next = StreamConfig::new("Packet", "k", 10, "pkt_tag_2").with_start_key(json!(100));
        stream.restart(next).await.unwrap();

        assert!(stream.is_empty());
        assert!(!transport.has_handler("pkt_tag"));
        assert!(transport.has_handler("pkt_tag_2"));
        assert_eq!(registry.tags(), vec!["pkt_tag_2".to_string()]);
        assert_eq!(transport.requests_for(START_STREAM_EVENT)[1]["start_key"], json!(100));
    }

    #[tokio::test]
    async fn stop_sends_leave_and_detaches() {
        let (transport, registry, stream) = setup(10);
        stream.start().await.unwrap();
        transport.push("pkt_tag", json!({"k": 1}));

        stream.stop().await.unwrap();

        assert_eq!(
            transport.requests_for(LEAVE_EVENT),
            vec![json!({"table_name": "Packet", "stream_tag": "pkt_tag"})]
        );
        assert!(!transport.push("pkt_tag", json!({"k": 2})));
        assert!(registry.is_empty());
        assert_eq!(keys(&stream), vec![json!(1)]);
    }

    #[test]
    fn batch_notifies_once_with_last_item() {
        let registry = Arc::new(StreamRegistry::new());
        let stream = WindowStream::new(config(10), Arc::new(MemoryTransport::new()), registry);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        stream.on_new_data(move |v| seen.lock().unwrap().push(v.clone()));

        stream.apply_event(json!([{"k": 1}, {"k": 2}, {"k": 3}]));

        assert_eq!(*calls.lock().unwrap(), vec![json!({"k": 3})]);
    }

    #[test]
    fn malformed_items_are_skipped_rest_of_batch_applies() {
        let registry = Arc::new(StreamRegistry::new());
        let stream = WindowStream::new(config(10), Arc::new(MemoryTransport::new()), registry);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        stream.on_new_data(move |v| {
            assert_eq!(v, &json!({"k": 4}));
            h.fetch_add(1, Ordering::SeqCst);
        });

        let summary = stream.apply_event(json!([{"k": 2}, {"nokey": true}, "junk", {"k": 4}, {"x": 1}]));

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.rejected, 3);
        assert_eq!(keys(&stream), vec![json!(2), json!(4)]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn capacity_eviction_moves_start_key() {
        let registry = Arc::new(StreamRegistry::new());
        let stream = WindowStream::new(config(3), Arc::new(MemoryTransport::new()), registry);
        stream.apply_event(json!([{"k": 2}, {"k": 5}, {"k": 9}]));
        assert_eq!(stream.config().end_key, json!(9));

        let summary = stream.apply_event(json!({"k": 7}));

        assert_eq!(summary.evicted, 1);
        assert_eq!(keys(&stream), vec![json!(5), json!(7), json!(9)]);
        let cfg = stream.config();
        assert_eq!(cfg.start_key, json!(5));
        assert_eq!(cfg.end_key, json!(9));
    }

    #[test]
    fn dropped_stream_handler_is_inert() {
        let transport = Arc::new(MemoryTransport::new());
        let registry = Arc::new(StreamRegistry::new());
        let stream = WindowStream::new(config(3), transport.clone(), Arc::clone(&registry));
        stream.attach("pkt_tag");
        drop(stream);

        assert!(transport.push("pkt_tag", json!({"k": 1})));
        assert!(registry.active().is_empty());
    }

    #[tokio::test]
    async fn smaller_acked_count_trims_cached_window() {
        let transport = Arc::new(MemoryTransport::with_responder(|_, payload| {
            bounds_ack(payload["start_key"].clone(), json!(5), 2, 40)
        }));
        let registry = Arc::new(StreamRegistry::new());
        let stream = WindowStream::new(config(10), transport.clone(), registry);
        stream.apply_event(json!([{"k": 1}, {"k": 2}, {"k": 3}, {"k": 4}, {"k": 5}]));

        stream.start().await.unwrap();
        assert_eq!(keys(&stream), vec![json!(4), json!(5)]);
        assert_eq!(stream.config().start_key, json!(4));
        assert!(!stream.is_starting());

        transport.push("pkt_tag", json!({"k": 6}));
        let cfg = stream.config();
        assert!(stream.len() <= cfg.count);
        assert_eq!(keys(&stream), vec![json!(5), json!(6)]);
    }
}
