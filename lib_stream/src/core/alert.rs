//! # Alert Banner
//!
//! The user-facing notice shown while the transport is down, and for alerts the server
//! pushes on the `alert` event. A dismissed connection alert stays hidden until the
//! connection comes back; the next outage shows it again.

use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::transport::{ConnectionState, EventHandler};

/// Longest message shown before truncation.
pub const MAX_ALERT_CHARS: usize = 110;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

impl AlertLevel {
    /// Maps the server's level names. Unknown names are informational.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "error" | "danger" | "critical" => AlertLevel::Error,
            "warning" | "warn" => AlertLevel::Warning,
            _ => AlertLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSource {
    Transport,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub source: AlertSource,
}

#[derive(Deserialize)]
struct ServerAlert {
    #[serde(default)]
    lvl: Value,
    #[serde(default)]
    msg: String,
}

#[derive(Default)]
struct BannerState {
    current: Option<Alert>,
    dismissed: bool,
}

#[derive(Default)]
pub struct AlertBanner {
    state: Mutex<BannerState>,
}

pub fn truncate_message(msg: &str) -> String {
    if msg.chars().count() > MAX_ALERT_CHARS {
        let head: String = msg.chars().take(MAX_ALERT_CHARS).collect();
        format!("{}...", head)
    } else {
        msg.to_string()
    }
}

impl AlertBanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The alert on display, if any.
    pub fn current(&self) -> Option<Alert> {
        self.state.lock().expect("Alert lock poisoned").current.clone()
    }

    pub fn show(&self, level: AlertLevel, message: &str, source: AlertSource) {
        let mut state = self.state.lock().expect("Alert lock poisoned");
        if source == AlertSource::Transport && state.dismissed {
            return;
        }
        let message = truncate_message(message);
        match level {
            AlertLevel::Error => log::error!("Alert: {}", message),
            AlertLevel::Warning => log::warn!("Alert: {}", message),
            AlertLevel::Info => log::info!("Alert: {}", message),
        }
        state.current = Some(Alert {
            level,
            message,
            source,
        });
    }

    pub fn dismiss(&self) {
        let mut state = self.state.lock().expect("Alert lock poisoned");
        if let Some(alert) = state.current.take() {
            if alert.source == AlertSource::Transport {
                state.dismissed = true;
            }
        }
    }

    /// Reacts to one connection state: an outage shows the banner, a connection clears it.
    pub fn handle_connection_state(&self, conn: &ConnectionState) {
        match conn {
            ConnectionState::Reconnecting { attempt, reason } => {
                let msg = format!(
                    "Connection lost ({}). Reconnecting, attempt {}...",
                    reason, attempt
                );
                self.show(AlertLevel::Warning, &msg, AlertSource::Transport);
            }
            ConnectionState::Connected { .. } => {
                let mut state = self.state.lock().expect("Alert lock poisoned");
                state.dismissed = false;
                if state
                    .current
                    .as_ref()
                    .is_some_and(|a| a.source == AlertSource::Transport)
                {
                    state.current = None;
                    log::info!("Connection restored, alert cleared");
                }
            }
            ConnectionState::Connecting => {}
        }
    }

    /// Push handler for the server's `alert` event (`{ "lvl": ..., "msg": ... }`).
    pub fn server_alert_handler(self: &Arc<Self>) -> EventHandler {
        let banner = Arc::clone(self);
        Arc::new(move |payload: Value| match serde_json::from_value::<ServerAlert>(payload) {
            Ok(alert) => {
                let level = match &alert.lvl {
                    Value::String(s) => AlertLevel::from_name(s),
                    Value::Number(n) if n.as_i64().unwrap_or(0) >= 40 => AlertLevel::Error,
                    Value::Number(n) if n.as_i64().unwrap_or(0) >= 30 => AlertLevel::Warning,
                    _ => AlertLevel::Info,
                };
                banner.show(level, &alert.msg, AlertSource::Server);
            }
            Err(e) => log::warn!("Ignoring malformed alert: {}", e),
        })
    }

    /// Follows a transport's connection state until the transport goes away.
    pub fn spawn_watcher(
        self: &Arc<Self>,
        mut state_rx: watch::Receiver<ConnectionState>,
    ) -> JoinHandle<()> {
        let banner = Arc::clone(self);
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let conn = state_rx.borrow_and_update().clone();
                banner.handle_connection_state(&conn);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn down(attempt: u32) -> ConnectionState {
        ConnectionState::Reconnecting {
            attempt,
            reason: "connection reset".into(),
        }
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "x".repeat(200);
        let out = truncate_message(&long);
        assert_eq!(out.chars().count(), MAX_ALERT_CHARS + 3);
        assert!(out.ends_with("..."));
        assert_eq!(truncate_message("short"), "short");
    }

    #[test]
    fn outage_shows_and_reconnect_clears() {
        let banner = AlertBanner::new();
        banner.handle_connection_state(&down(1));
        let alert = banner.current().unwrap();
        assert_eq!(alert.level, AlertLevel::Warning);
        assert!(alert.message.contains("attempt 1"));

        banner.handle_connection_state(&ConnectionState::Connected { epoch: 2 });
        assert!(banner.current().is_none());
    }

    #[test]
    fn dismissal_lasts_until_next_outage() {
        let banner = AlertBanner::new();
        banner.handle_connection_state(&down(1));
        banner.dismiss();
        banner.handle_connection_state(&down(2));
        assert!(banner.current().is_none());

        banner.handle_connection_state(&ConnectionState::Connected { epoch: 2 });
        banner.handle_connection_state(&down(1));
        assert!(banner.current().is_some());
    }

    #[test]
    fn server_alerts_show_and_survive_reconnect() {
        let banner = Arc::new(AlertBanner::new());
        let handler = banner.server_alert_handler();
        handler(json!({"lvl": "danger", "msg": "Node 7 offline"}));

        let alert = banner.current().unwrap();
        assert_eq!(alert.level, AlertLevel::Error);
        assert_eq!(alert.source, AlertSource::Server);

        banner.handle_connection_state(&ConnectionState::Connected { epoch: 3 });
        assert_eq!(banner.current().unwrap().message, "Node 7 offline");
    }
}
