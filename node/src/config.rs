//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use lcap_poller::{EngineConfig, PollConfig, RepairConfig, SchedulerConfig, V3Config};
use lcap_types::PeerId;

use crate::logging::LogFormat;
use crate::NodeError;

/// One archival unit served from a directory on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuConfig {
    pub id: String,

    #[serde(default = "default_plugin")]
    pub plugin: String,

    /// URL prefix the files under `dir` are published at.
    pub base_url: String,

    pub dir: PathBuf,

    #[serde(default)]
    pub open_access: bool,
}

/// Configuration for an LCAP node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). The engine sections are the
/// poll engine's own tables and keep their defaults when omitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's identity on the network.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Peers this node may invite and expects to hear from.
    #[serde(default)]
    pub peers: Vec<String>,

    #[serde(default)]
    pub archival_units: Vec<AuConfig>,

    /// Hashing throughput used for estimates, in bytes per millisecond.
    #[serde(default = "default_hash_bytes_per_ms")]
    pub hash_bytes_per_ms: u64,

    /// Where peer reputation and agreement history are kept between runs.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Poll-service mailbox capacity.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Seconds between secret-registry and scheduler housekeeping passes.
    #[serde(default = "default_housekeeping_secs")]
    pub housekeeping_secs: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to collect Prometheus metrics.
    #[serde(default)]
    pub enable_metrics: bool,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub v3: V3Config,

    #[serde(default)]
    pub repair: RepairConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_node_id() -> String {
    "lcap-local".to_string()
}

fn default_plugin() -> String {
    "org.lockss.plugin.Default".to_string()
}

fn default_hash_bytes_per_ms() -> u64 {
    50_000
}

fn default_mailbox_capacity() -> usize {
    1024
}

fn default_housekeeping_secs() -> u64 {
    60
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
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(format!("{path}: {e}")))?;
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

    /// The poll engine's share of the configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            poll: self.poll.clone(),
            v3: self.v3.clone(),
            repair: self.repair.clone(),
            scheduler: self.scheduler.clone(),
        }
    }

    pub fn local_peer(&self) -> Result<PeerId, NodeError> {
        PeerId::parse(&self.node_id).map_err(|e| NodeError::Config(format!("node_id: {e}")))
    }

    pub fn peer_ids(&self) -> Result<Vec<PeerId>, NodeError> {
        self.peers
            .iter()
            .map(|p| PeerId::parse(p).map_err(|e| NodeError::Config(format!("peer {p}: {e}"))))
            .collect()
    }

    pub fn log_format(&self) -> Result<LogFormat, NodeError> {
        self.log_format.parse()
    }

    /// Check everything that can be checked without touching the disk.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.engine().validate()?;
        let local = self.local_peer()?;
        let peers = self.peer_ids()?;
        if peers.contains(&local) {
            return Err(NodeError::Config(format!("{local} lists itself as a peer")));
        }
        self.log_format()?;
        if self.mailbox_capacity == 0 {
            return Err(NodeError::Config("mailbox_capacity must be at least 1".into()));
        }
        if self.hash_bytes_per_ms == 0 {
            return Err(NodeError::Config("hash_bytes_per_ms must be at least 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for au in &self.archival_units {
            if !seen.insert(au.id.as_str()) {
                return Err(NodeError::Config(format!("archival unit {} defined twice", au.id)));
            }
            if au.base_url.is_empty() {
                return Err(NodeError::Config(format!("archival unit {} has no base_url", au.id)));
            }
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            peers: Vec::new(),
            archival_units: Vec::new(),
            hash_bytes_per_ms: default_hash_bytes_per_ms(),
            identity_file: None,
            mailbox_capacity: default_mailbox_capacity(),
            housekeeping_secs: default_housekeeping_secs(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: false,
            poll: PollConfig::default(),
            v3: V3Config::default(),
            repair: RepairConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.node_id, "lcap-local");
        assert_eq!(config.poll.quorum, 5);
        assert_eq!(config.v3.quorum, 5);
        assert_eq!(config.log_format, "human");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            node_id = "alpha"
            peers = ["beta", "gamma"]

            [poll]
            quorum = 3
            vote_margin = 0.6

            [[archival_units]]
            id = "au1"
            base_url = "http://example.org"
            dir = "/srv/au1"
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.poll.quorum, 3);
        assert_eq!(config.poll.vote_margin, 0.6);
        assert_eq!(config.poll.trusted_weight, 350); // default
        assert_eq!(config.archival_units[0].plugin, "org.lockss.plugin.Default");
        assert!(!config.archival_units[0].open_access);
        assert_eq!(config.peer_ids().unwrap().len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn self_as_peer_is_rejected() {
        let config = NodeConfig {
            node_id: "alpha".into(),
            peers: vec!["alpha".into()],
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn invalid_engine_values_are_rejected() {
        let mut config = NodeConfig::default();
        config.poll.vote_margin = 0.2;
        assert!(matches!(config.validate(), Err(NodeError::Poll(_))));
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let config = NodeConfig {
            log_format: "xml".into(),
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/lcap.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lcap.toml");
        std::fs::write(&path, "node_id = \"delta\"\nenable_metrics = true\n").unwrap();
        let config = NodeConfig::from_toml_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.node_id, "delta");
        assert!(config.enable_metrics);
    }
}
