use std::fs;
use std::path::PathBuf;
#[cfg(feature = "ws")]
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StreamError};
use crate::models::StreamConfig;

/// Default location of the JSON configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "stream_tail.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Follow an ordered record stream and keep a bounded window of it", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "STREAM_URL", help = "Base WebSocket URL of the stream server.")]
    pub url: Option<String>,

    #[clap(long, env = "STREAM_NAMESPACE", help = "Namespace path appended to the URL.")]
    pub namespace: Option<String>,

    #[clap(long, env = "STREAM_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "STREAM_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STREAM_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "STREAM_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "STREAM_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "STREAM_ACK_TIMEOUT_MS", help = "Milliseconds to wait for a request acknowledgment.")]
    pub ack_timeout_ms: Option<u64>,

    #[clap(long, env = "STREAM_TABLE", help = "Server-side table to subscribe to.")]
    pub table_name: Option<String>,

    #[clap(long, env = "STREAM_KEY_FIELD", help = "Record field holding the ordering key.")]
    pub key_field: Option<String>,

    #[clap(long, env = "STREAM_RESTRICT_BY", value_parser = parse_json, help = "Server-side filter, as JSON.")]
    pub restrict_by: Option<Value>,

    #[clap(long, env = "STREAM_START_KEY", value_parser = parse_json, help = "Initial lower bound, as JSON.")]
    pub start_key: Option<Value>,

    #[clap(long, env = "STREAM_COUNT", help = "Maximum number of records kept in the window.")]
    pub count: Option<usize>,

    #[clap(long, env = "STREAM_TAG", help = "Event name of the subscription's pushes.")]
    pub stream_tag: Option<String>,
}

fn parse_json(s: &str) -> std::result::Result<Value, serde_json::Error> {
    // Bare words are taken as strings so `--start-key abc` works without quoting.
    serde_json::from_str(s).or_else(|_| Ok(Value::String(s.to_string())))
}

impl Config {
    /// Built-in defaults, the lowest layer.
    pub fn defaults() -> Config {
        Config {
            url: Some("ws://127.0.0.1:5050".to_string()),
            namespace: Some("/sl".to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(60000),
            ack_timeout_ms: Some(10000),
            key_field: Some("ts".to_string()),
            count: Some(20),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    pub fn merge(self, other: Config) -> Config {
        Config {
            url: other.url.or(self.url),
            namespace: other.namespace.or(self.namespace),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            ack_timeout_ms: other.ack_timeout_ms.or(self.ack_timeout_ms),
            table_name: other.table_name.or(self.table_name),
            key_field: other.key_field.or(self.key_field),
            restrict_by: other.restrict_by.or(self.restrict_by),
            start_key: other.start_key.or(self.start_key),
            count: other.count.or(self.count),
            stream_tag: other.stream_tag.or(self.stream_tag),
        }
    }

    #[cfg(feature = "ws")]
    pub fn transport_config(&self) -> crate::transport::TransportConfig {
        let base = crate::transport::TransportConfig::default();
        crate::transport::TransportConfig {
            url: self.url.clone().unwrap_or(base.url),
            namespace: self.namespace.clone().unwrap_or(base.namespace),
            reconnect_base_delay: self
                .reconnect_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.reconnect_base_delay),
            reconnect_max_delay: self
                .reconnect_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.reconnect_max_delay),
            ack_timeout: self
                .ack_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.ack_timeout),
        }
    }

    /// The subscription described by this configuration.
    ///
    /// `table_name` is required; the stream tag defaults to `<table_name>_stream`.
    pub fn stream_config(&self) -> Result<StreamConfig> {
        let table_name = self
            .table_name
            .clone()
            .ok_or_else(|| StreamError::Malformed("table_name is not configured".to_string()))?;
        let key_field = self
            .key_field
            .clone()
            .ok_or_else(|| StreamError::Malformed("key_field is not configured".to_string()))?;
        let stream_tag = self
            .stream_tag
            .clone()
            .unwrap_or_else(|| format!("{}_stream", table_name));

        Ok(StreamConfig::new(table_name, key_field, self.count.unwrap_or(20), stream_tag)
            .with_restrict_by(self.restrict_by.clone().unwrap_or(Value::Null))
            .with_start_key(self.start_key.clone().unwrap_or(Value::Null)))
    }
}

/// Loads the configuration: defaults, then the JSON file, then env vars and CLI flags.
///
/// Argument errors, `--help` and `--version` are handled by clap, which prints and exits.
pub fn load_config() -> Config {
    layer_over_file(Config::parse())
}

/// [`load_config`] with an explicit argument list. Argument errors, including the
/// `--help` and `--version` displays, come back as [`StreamError::Args`].
pub fn load_config_from<I, T>(args: I) -> Result<Config>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    // clap also reads the env vars here, so this layer covers both.
    Ok(layer_over_file(Config::try_parse_from(args)?))
}

fn layer_over_file(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    current_config.merge(cli)
}
