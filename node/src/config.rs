//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use peerlink_types::NodeAddr;

use crate::NodeError;

/// Configuration for the peer node control plane.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address of this node, written `"zone.cluster.node"`.
    #[serde(default = "default_own_address")]
    pub own_address: NodeAddr,

    /// Upper bound on the number of peer nodes tracked at once.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,

    /// Ceiling on the keepalive period, whatever the link tolerances.
    #[serde(default = "default_keepalive_max_interval_ms")]
    pub keepalive_max_interval_ms: u64,

    /// Tolerance handed to links the factory creates without a bearer-specific value.
    #[serde(default = "default_link_tolerance_ms")]
    pub default_link_tolerance_ms: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to expose Prometheus metrics.
    #[serde(default)]
    pub enable_metrics: bool,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_own_address() -> NodeAddr {
    NodeAddr::from_parts(1, 1, 1)
}

fn default_max_nodes() -> usize {
    4095
}

fn default_keepalive_max_interval_ms() -> u64 {
    500
}

fn default_link_tolerance_ms() -> u64 {
    1500
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn keepalive_cap(&self) -> Duration {
        Duration::from_millis(self.keepalive_max_interval_ms)
    }

    pub fn default_link_tolerance(&self) -> Duration {
        Duration::from_millis(self.default_link_tolerance_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            own_address: default_own_address(),
            max_nodes: default_max_nodes(),
            keepalive_max_interval_ms: default_keepalive_max_interval_ms(),
            default_link_tolerance_ms: default_link_tolerance_ms(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.own_address, config.own_address);
        assert_eq!(parsed.keepalive_max_interval_ms, 500);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.own_address, NodeAddr::from_parts(1, 1, 1));
        assert_eq!(config.default_link_tolerance_ms, 1500);
        assert_eq!(config.log_format, "human");
        assert!(!config.enable_metrics);
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            own_address = "1.1.42"
            keepalive_max_interval_ms = 200
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.own_address, NodeAddr::from_parts(1, 1, 42));
        assert_eq!(config.keepalive_cap(), Duration::from_millis(200));
        assert_eq!(config.log_level, "info"); // default
    }

    #[test]
    fn malformed_address_is_config_error() {
        let err = NodeConfig::from_toml_str(r#"own_address = "1.1""#).unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "own_address = \"0.256.1\"\nmax_nodes = 8").unwrap();
        let config = NodeConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.own_address, NodeAddr::new(0x100001));
        assert_eq!(config.max_nodes, 8);
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeConfig::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }
}
