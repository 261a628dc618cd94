//! Configuration loading for the shardlord control plane
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (`SHARDLORD_*`, highest precedence)
//! 2. `shardlord.local.toml` (gitignored, local overrides)
//! 3. `shardlord.toml` (cluster definition: nodes + engine tunables)
//! 4. `~/.config/shardlord/config.toml` (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! This is the only place `cmd_retry_naptime`, `poll_interval`,
//! `sync_replicas` and worker connection strings are read from disk.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use shardlord_types::NodeId;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Top-level shardlord configuration: the cluster's node registry plus the
/// copy engine's tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardlordConfig {
    pub cluster: ClusterConfig,
    pub catalog: CatalogConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Where the shardlord's own metadata database lives -- distinct from
/// `cluster.nodes`, which are worker connection strings the engine copies
/// data between. `shardlord-catalog::PgCatalog` connects here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// libpq connection string for the metadata catalog database.
    pub conninfo: String,
}

/// The cluster's node registry: every worker's connection string, keyed by
/// its `NodeId`. The engine never discovers nodes on its own -- they are
/// registered out of band by the (out-of-scope) add-node workflow and
/// simply read from here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// `node_id -> libpq connection string`, e.g. `5 = "host=db5 dbname=shard"`.
    pub nodes: BTreeMap<i32, String>,
}

impl ClusterConfig {
    pub fn connection_string(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node.get()).map(String::as_str)
    }
}

/// Copy-engine tunables: retry and backoff timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay before retrying a transport/remote-execution failure.
    pub cmd_retry_naptime_ms: u64,
    /// Delay before re-polling a not-ready condition (tablesync, received_lsn).
    pub poll_interval_ms: u64,
    /// Whether reconfiguration should enroll new replicas as synchronous
    /// standbys.
    pub sync_replicas: bool,
    /// The well-known meta-subscription name used by the catalog-freshness
    /// barrier.
    pub meta_subscription_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cmd_retry_naptime_ms: 10_000,
            poll_interval_ms: 10_000,
            sync_replicas: false,
            meta_subscription_name: "shardman_meta_sub".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` env-filter directive, e.g. `"shardlord=debug,info"`.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl ShardlordConfig {
    /// Load configuration from default locations relative to the current directory.
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific cluster directory.
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Validate cross-field invariants the `config` crate can't express:
    /// naptimes must be positive, and every configured node's connection
    /// string must be non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.cmd_retry_naptime_ms == 0 {
            return Err(ConfigError::ValidationError(
                "engine.cmd_retry_naptime_ms must be > 0".to_string(),
            ));
        }
        if self.engine.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "engine.poll_interval_ms must be > 0".to_string(),
            ));
        }
        for (id, conninfo) in &self.cluster.nodes {
            if conninfo.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "node {id} has an empty connection string"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShardlordConfig::default();
        assert_eq!(config.engine.cmd_retry_naptime_ms, 10_000);
        assert_eq!(config.engine.poll_interval_ms, 10_000);
        assert!(!config.engine.sync_replicas);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_naptime() {
        let mut config = ShardlordConfig::default();
        config.engine.cmd_retry_naptime_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_blank_conninfo() {
        let mut config = ShardlordConfig::default();
        config.cluster.nodes.insert(1, String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connection_string_lookup() {
        let mut config = ShardlordConfig::default();
        config
            .cluster
            .nodes
            .insert(1, "host=db1 dbname=shard".to_string());
        assert_eq!(
            config.cluster.connection_string(NodeId::new(1)),
            Some("host=db1 dbname=shard")
        );
        assert_eq!(config.cluster.connection_string(NodeId::new(2)), None);
    }
}
