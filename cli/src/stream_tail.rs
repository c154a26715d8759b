//! # `stream_tail`: follow one ordered record stream
//!
//! Subscribes to a table on a stream server and keeps a bounded, sorted window of its
//! records, logging the latest item and the window bounds after every update. The
//! subscription survives server restarts and network drops: the transport reconnects
//! on its own and the stream is resubscribed with its last bounds.
//!
//! ## Usage
//!
//! ```text
//! stream_tail --url ws://127.0.0.1:5050 --namespace /sl \
//!             --table-name Packet --key-field ts --count 20
//! ```
//!
//! Every flag can also come from a `STREAM_*` environment variable or from the JSON
//! file given by `--config-path` (default `stream_tail.conf`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;

use lib_stream::configs::load_config;
use lib_stream::loggers::setup_logging;
use lib_stream::models::ALERT_EVENT;
use lib_stream::transport::WsTransport;
use lib_stream::{AlertBanner, StreamRegistry, Transport, WindowStream};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let log_path = setup_logging("stream_tail", &log_dir, &log_level)?;
    log::info!("Logging to {}", log_path.display());

    let stream_config = config
        .stream_config()
        .context("a table to follow is required (--table-name)")?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let (transport, transport_handle) =
        WsTransport::connect(config.transport_config(), shutdown_tx.subscribe())?;
    let transport = Arc::new(transport);

    let registry = Arc::new(StreamRegistry::new());
    let banner = Arc::new(AlertBanner::new());
    registry.spawn_reconnect_watcher(transport.connection_state());
    banner.spawn_watcher(transport.connection_state());
    transport.on(ALERT_EVENT, banner.server_alert_handler());

    let stream = WindowStream::new(stream_config, transport.clone(), Arc::clone(&registry));
    let view = Arc::downgrade(&stream);
    stream.on_new_data(move |latest| {
        let Some(stream) = view.upgrade() else { return };
        let cfg = stream.config();
        log::info!(
            "latest {} | window {} record(s), keys {} .. {}",
            latest,
            stream.len(),
            cfg.start_key,
            cfg.end_key
        );
    });

    // A failed start is logged and the stream stays registered. One that gave up before
    // the first connection starts when the transport connects; otherwise the next
    // reconnect resubscribes it.
    match stream.start().await {
        Ok(bounds) => log::info!(
            "Following '{}' ({} items on server)",
            stream.stream_tag(),
            bounds.total_item_count
        ),
        Err(e) => log::error!("startstream failed: {}", e),
    }

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    if let Err(e) = stream.stop().await {
        log::warn!("leave failed: {}", e);
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    transport_handle.await?;

    log::info!("Shutdown complete.");
    Ok(())
}
