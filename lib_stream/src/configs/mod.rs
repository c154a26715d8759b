//! # Configuration Module
//!
//! Layered client configuration: built-in defaults, then a JSON file, then
//! environment variables and command-line flags.

/// The `Config` struct, its layering and the typed configurations derived from it.
pub mod config;

pub use config::{load_config, load_config_from, Config, DEFAULT_CONFIG_FILE};
