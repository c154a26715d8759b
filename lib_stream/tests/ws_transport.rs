//! # WebSocket Transport Integration Tests
//!
//! Runs a throwaway stream server on a random local port and drives real
//! `WindowStream`s through `WsTransport` against it: subscription, pushes, and
//! resubscription after the server drops the connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message, WebSocketStream};

use lib_stream::models::{Frame, START_STREAM_EVENT};
use lib_stream::transport::{TransportConfig, WsTransport};
use lib_stream::{AlertBanner, StreamConfig, StreamError, StreamRegistry, Transport, WindowStream};

type ServerWs = WebSocketStream<TcpStream>;

/// Reads frames until the next client request and returns `(id, event, data)`.
async fn next_request(ws: &mut ServerWs) -> (u64, String, Value) {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame: Frame = serde_json::from_str(text.as_str()).expect("bad frame");
                if let Frame::Event { event, id: Some(id), data } = frame {
                    return (id, event, data);
                }
            }
            Some(Ok(_)) => continue,
            other => panic!("client connection ended: {:?}", other),
        }
    }
}

async fn send(ws: &mut ServerWs, frame: Frame) {
    let text = serde_json::to_string(&frame).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

fn bounds_for(config: &Value, total: u64) -> Value {
    json!({
        "start_key": config["start_key"], "end_key": config["end_key"],
        "count": config["count"], "start_item_number": 0, "total_item_count": total
    })
}

fn transport_config(port: u16) -> TransportConfig {
    with_ack_timeout(port, Duration::from_secs(5))
}

fn with_ack_timeout(port: u16, ack_timeout: Duration) -> TransportConfig {
    TransportConfig {
        url: format!("ws://127.0.0.1:{}", port),
        namespace: "/sl".to_string(),
        reconnect_base_delay: Duration::from_millis(20),
        reconnect_max_delay: Duration::from_millis(100),
        ack_timeout,
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

#[tokio::test]
async fn subscribes_and_applies_pushes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();

        let (id, event, data) = next_request(&mut ws).await;
        assert_eq!(event, START_STREAM_EVENT);
        assert_eq!(data["table_name"], json!("Packet"));
        send(&mut ws, Frame::Ack { id, data: bounds_for(&data, 3) }).await;

        send(
            &mut ws,
            Frame::Event {
                event: "pkt".into(),
                id: None,
                data: json!([{"ts": 30, "rssi": -70}, {"ts": 10}, {"ts": 20}]),
            },
        )
        .await;
        send(
            &mut ws,
            Frame::Event { event: "pkt".into(), id: None, data: json!({"_del_key": 20}) },
        )
        .await;

        // Keep the connection open until the client is done.
        let _ = ws.next().await;
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (transport, task) = WsTransport::connect(transport_config(port), shutdown_rx).unwrap();
    let transport = Arc::new(transport);
    let registry = Arc::new(StreamRegistry::new());

    let stream = WindowStream::new(
        StreamConfig::new("Packet", "ts", 10, "pkt"),
        transport.clone(),
        Arc::clone(&registry),
    );
    let (latest_tx, mut latest_rx) = mpsc::unbounded_channel();
    stream.on_new_data(move |v| {
        let _ = latest_tx.send(v.clone());
    });

    let bounds = stream.start().await.unwrap();
    assert_eq!(bounds.total_item_count, 3);

    wait_for("delete to apply", || stream.len() == 2).await;
    let keys: Vec<Value> = stream.records().iter().map(|r| r.get("ts").cloned().unwrap()).collect();
    assert_eq!(keys, vec![json!(10), json!(30)]);

    assert_eq!(latest_rx.recv().await.unwrap(), json!({"ts": 20}));
    assert_eq!(latest_rx.recv().await.unwrap(), json!({"_del_key": 20}));

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
    server.abort();
}

#[tokio::test]
async fn resubscribes_after_server_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (resub_tx, mut resub_rx) = mpsc::unbounded_channel::<Value>();

    let server = tokio::spawn(async move {
        // First session: ack, push one record, then hang up.
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let (id, _, data) = next_request(&mut ws).await;
        send(&mut ws, Frame::Ack { id, data: bounds_for(&data, 1) }).await;
        send(
            &mut ws,
            Frame::Event { event: "nodes".into(), id: None, data: json!({"slid": 7, "name": "n7"}) },
        )
        .await;
        // Give the client a moment to apply the push before the close arrives.
        tokio::time::sleep(Duration::from_millis(100)).await;
        ws.close(None).await.unwrap();
        drop(ws);

        // Second session: report the resubscription payload.
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let (id, event, data) = next_request(&mut ws).await;
        assert_eq!(event, START_STREAM_EVENT);
        send(&mut ws, Frame::Ack { id, data: bounds_for(&data, 1) }).await;
        resub_tx.send(data).unwrap();
        let _ = ws.next().await;
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (transport, task) = WsTransport::connect(transport_config(port), shutdown_rx).unwrap();
    let transport = Arc::new(transport);
    let registry = Arc::new(StreamRegistry::new());
    let banner = Arc::new(AlertBanner::new());
    let _watcher = registry.spawn_reconnect_watcher(transport.connection_state());
    let _banner_watcher = banner.spawn_watcher(transport.connection_state());

    let stream = WindowStream::new(
        StreamConfig::new("Node", "slid", 5, "nodes"),
        transport.clone(),
        Arc::clone(&registry),
    );
    stream.start().await.unwrap();
    wait_for("first push", || stream.len() == 1).await;

    let resubscribed = tokio::time::timeout(Duration::from_secs(5), resub_rx.recv())
        .await
        .expect("no resubscription")
        .unwrap();

    assert_eq!(resubscribed["table_name"], json!("Node"));
    assert_eq!(resubscribed["key_field"], json!("slid"));
    assert_eq!(resubscribed["stream_tag"], json!("nodes"));
    assert_eq!(resubscribed["count"], json!(5));
    assert_eq!(resubscribed["end_key"], json!(7));
    assert_eq!(stream.len(), 1);

    wait_for("alert to clear", || banner.current().is_none()).await;

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
    server.abort();
}

#[tokio::test]
async fn start_that_timed_out_before_first_connect_subscribes_once() {
    // Find a free port, then leave it closed until the start has given up.
    let port = {
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        reserved.local_addr().unwrap().port()
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (transport, task) =
        WsTransport::connect(with_ack_timeout(port, Duration::from_millis(150)), shutdown_rx)
            .unwrap();
    let transport = Arc::new(transport);
    let registry = Arc::new(StreamRegistry::new());
    let _watcher = registry.spawn_reconnect_watcher(transport.connection_state());

    let stream = WindowStream::new(
        StreamConfig::new("Packet", "ts", 10, "pkt"),
        transport.clone(),
        Arc::clone(&registry),
    );
    let err = stream.start().await.unwrap_err();
    assert!(matches!(err, StreamError::AckTimeout { .. }));

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<(u64, usize)>();
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();

        let (id, event, data) = next_request(&mut ws).await;
        assert_eq!(event, START_STREAM_EVENT);
        send(&mut ws, Frame::Ack { id, data: bounds_for(&data, 7) }).await;

        // Anything else within a short grace period would be a duplicate subscription.
        let mut extra = 0;
        while tokio::time::timeout(Duration::from_millis(300), next_request(&mut ws))
            .await
            .is_ok()
        {
            extra += 1;
        }
        seen_tx.send((id, extra)).unwrap();
        let _ = ws.next().await;
    });

    wait_for("acked bounds", || stream.config().total_item_count == Some(7)).await;
    let (id, extra) = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("server never reported")
        .unwrap();
    assert_ne!(id, 1, "the expired request went out");
    assert_eq!(extra, 0);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
    server.abort();
}
