//! Configuration for parksim

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address for the simulation endpoint
    #[serde(default = "default_address")]
    pub address: String,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Seconds a client may stay silent before its channel is torn down
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_idle_timeout_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            metrics_port: default_metrics_port(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Validate configuration, warning about common misconfigurations.
    pub fn validate(&self) {
        use tracing::warn;

        if self.idle_timeout_secs == 0 {
            warn!("idle_timeout_secs is 0; clients will be disconnected immediately");
        }
        if self.address.parse::<std::net::SocketAddr>().is_err() {
            warn!(address = %self.address, "address does not look like host:port");
        }
    }

    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "address": "127.0.0.1:9000",
            "metrics_port": 0,
            "idle_timeout_secs": 60
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.address, "127.0.0.1:9000");
        assert_eq!(config.metrics_port, 0);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.address, "0.0.0.0:8000");
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.idle_timeout_secs, 300);
    }
}
