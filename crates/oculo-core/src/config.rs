//! Daemon configuration with platform-aware defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the ingestion daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address to accept producer connections on. A value beginning with `/`
    /// is a Unix-domain socket path; anything else is a TCP address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Path to the SQLite database file. The parent directory is created on
    /// first open.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// HTTP address for the metrics endpoint. Empty disables the server.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// Maximum number of buffered items before a flush is forced.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time between flushes, in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen_addr() -> String {
    if cfg!(unix) {
        "/tmp/oculo.sock".to_string()
    } else {
        "127.0.0.1:9876".to_string()
    }
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".oculo")
        .join("oculo.db")
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9877".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_flush_interval_ms() -> u64 {
    500
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            db_path: default_db_path(),
            metrics_addr: default_metrics_addr(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// The flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// True when the listen address names a Unix-domain socket path.
    pub fn listen_is_unix(&self) -> bool {
        self.listen_addr.starts_with('/')
    }
}

/// Structured logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive when `RUST_LOG` is unset (trace, debug, info, warn,
    /// error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
