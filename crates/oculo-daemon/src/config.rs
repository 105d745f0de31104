//! YAML configuration loading for the daemon.
//!
//! Precedence, highest wins: CLI flags, `OCULO_*` environment variables,
//! config file values, built-in defaults.

use oculo_core::{DaemonConfig, OculoError, Result};
use std::path::Path;

/// Load a [`DaemonConfig`] from a YAML file at `path`.
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        OculoError::Config(format!("reading config file {}: {e}", path.display()))
    })?;
    serde_yaml::from_str(&contents)
        .map_err(|e| OculoError::Config(format!("parsing config YAML: {e}")))
}

/// Apply `OCULO_*` environment variable overrides in place.
pub fn apply_env_overrides(config: &mut DaemonConfig) {
    if let Ok(addr) = std::env::var("OCULO_LISTEN_ADDR") {
        config.listen_addr = addr;
    }
    if let Ok(path) = std::env::var("OCULO_DB_PATH") {
        config.db_path = path.into();
    }
    if let Ok(addr) = std::env::var("OCULO_METRICS_ADDR") {
        config.metrics_addr = addr;
    }
    if let Ok(batch) = std::env::var("OCULO_BATCH_SIZE") {
        if let Ok(batch) = batch.parse() {
            config.batch_size = batch;
        }
    }
    if let Ok(flush) = std::env::var("OCULO_FLUSH_INTERVAL_MS") {
        if let Ok(flush) = flush.parse() {
            config.flush_interval_ms = flush;
        }
    }
    if let Ok(level) = std::env::var("OCULO_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(format) = std::env::var("OCULO_LOG_FORMAT") {
        config.logging.format = format;
    }
}

/// Reject configurations the daemon cannot run with.
pub fn validate_config(config: &DaemonConfig) -> Result<()> {
    if config.listen_addr.is_empty() {
        return Err(OculoError::Config("listen_addr must not be empty".into()));
    }
    if config.batch_size == 0 {
        return Err(OculoError::Config("batch_size must be positive".into()));
    }
    if config.flush_interval_ms == 0 {
        return Err(OculoError::Config(
            "flush_interval_ms must be positive".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(yaml: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_load_config_partial_file() {
        let f = write_yaml("listen_addr: \"127.0.0.1:4000\"\nbatch_size: 50\n");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.batch_size, 50);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.flush_interval_ms, 500);
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Path::new("/nonexistent/oculo.yaml")).is_err());
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let f = write_yaml("batch_size: [not: a: number");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = DaemonConfig {
            batch_size: 0,
            ..DaemonConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_listen_addr() {
        let config = DaemonConfig {
            listen_addr: String::new(),
            ..DaemonConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(validate_config(&DaemonConfig::default()).is_ok());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("OCULO_BATCH_SIZE", "77");
        std::env::set_var("OCULO_LOG_LEVEL", "debug");

        let mut config = DaemonConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.batch_size, 77);
        assert_eq!(config.logging.level, "debug");

        std::env::remove_var("OCULO_BATCH_SIZE");
        std::env::remove_var("OCULO_LOG_LEVEL");
    }
}
