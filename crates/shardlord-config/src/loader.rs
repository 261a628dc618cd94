//! Configuration loader with multi-source merging

use crate::{Paths, ShardlordConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "SHARDLORD".to_string(),
        }
    }

    /// Set the cluster directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "SHARDLORD")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<ShardlordConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = ShardlordConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/shardlord/config.toml)
        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 3. Cluster config (shardlord.toml)
        let cluster_config_file = Paths::cluster_config_file(&self.project_dir);
        if cluster_config_file.exists() {
            builder = builder.add_source(
                config::File::from(cluster_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local config (shardlord.local.toml, gitignored)
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (SHARDLORD_*)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        // Build and deserialize
        let built = builder.build().context("failed to build configuration")?;

        let shardlord_config: ShardlordConfig = built
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        shardlord_config
            .validate()
            .context("configuration failed validation")?;

        Ok(shardlord_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> ShardlordConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .load()
            .expect("Failed to load config");

        assert_eq!(config.engine.cmd_retry_naptime_ms, 10_000);
        assert!(config.cluster.nodes.is_empty());
    }

    #[test]
    fn test_load_cluster_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[engine]
cmd_retry_naptime_ms = 5000
poll_interval_ms = 2000
sync_replicas = true

[cluster.nodes]
1 = "host=db1 dbname=shard"
2 = "host=db2 dbname=shard"
"#;
        fs::write(project_dir.join("shardlord.toml"), config_content)
            .expect("Failed to write config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .load()
            .expect("Failed to load config");

        assert_eq!(config.engine.cmd_retry_naptime_ms, 5000);
        assert_eq!(config.engine.poll_interval_ms, 2000);
        assert!(config.engine.sync_replicas);
        assert_eq!(config.cluster.nodes.len(), 2);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("shardlord.toml"),
            r#"
[engine]
poll_interval_ms = 10000
"#,
        )
        .expect("Failed to write cluster config");

        fs::write(
            project_dir.join("shardlord.local.toml"),
            r#"
[engine]
poll_interval_ms = 250
"#,
        )
        .expect("Failed to write local config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .load()
            .expect("Failed to load config");

        // Local config should override cluster config
        assert_eq!(config.engine.poll_interval_ms, 250);
    }

    #[test]
    fn test_rejects_invalid_merged_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("shardlord.toml"),
            "[engine]\ncmd_retry_naptime_ms = 0\n",
        )
        .expect("Failed to write config");

        let result = ConfigLoader::new().with_project_dir(project_dir).load();
        assert!(result.is_err());
    }
}
