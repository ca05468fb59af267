//! Configuration for Locus nodes and the directory server.
//!
//! Every field has a default so a partial (or absent) `config.toml` is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration, loaded from `~/.locus/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocusConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,
    /// Human-readable node name, used in log output only.
    pub node_name: String,
    /// Address the TCP transport listens on.
    pub listen_addr: String,
    /// Address of the directory server this node logs on to.
    pub directory_addr: Option<String>,
    /// Default bound on resolve calls. Absent means resolve waits until the
    /// name is registered, however long that takes.
    pub resolve_timeout_ms: Option<u64>,
    /// TCP transport tuning.
    pub tcp: TcpConfig,
}

impl Default for LocusConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            node_name: "locus-node".to_string(),
            listen_addr: "127.0.0.1:7400".to_string(),
            directory_addr: None,
            resolve_timeout_ms: None,
            tcp: TcpConfig::default(),
        }
    }
}

impl LocusConfig {
    pub fn resolve_timeout(&self) -> Option<Duration> {
        self.resolve_timeout_ms.map(Duration::from_millis)
    }
}

/// Settings for the TCP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// How long to wait for an outbound connection and its HELLO exchange.
    pub connect_timeout_ms: u64,
    /// Largest frame accepted from a peer, in bytes.
    pub max_frame_size: u32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl TcpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LocusConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
        assert!(config.directory_addr.is_none());
        assert!(config.resolve_timeout().is_none());
        assert_eq!(config.tcp.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: LocusConfig = toml::from_str(
            r#"
            directory_addr = "10.0.0.1:7400"
            resolve_timeout_ms = 2500

            [tcp]
            max_frame_size = 4096
        "#,
        )
        .unwrap();
        assert_eq!(config.directory_addr.as_deref(), Some("10.0.0.1:7400"));
        assert_eq!(config.resolve_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.tcp.max_frame_size, 4096);
        assert_eq!(config.tcp.connect_timeout_ms, 5_000);
        assert_eq!(config.listen_addr, "127.0.0.1:7400");
    }
}
