/// File + console logging setup with rotation of old log files.
pub mod logger;

pub use logger::{cleanup_old_logs, setup_logging};
