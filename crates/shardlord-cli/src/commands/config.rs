//! Configuration management commands.

use std::path::Path;

use anyhow::{Context, Result};
use shardlord_config::{Paths, ShardlordConfig};

/// Show current configuration.
pub fn show(project: &str, format: &str) -> Result<()> {
    let project_path = Path::new(project);

    if !Paths::is_initialized(project_path) {
        anyhow::bail!(
            "Project not initialized. Run 'shardlord init' in {} first.",
            project_path.display()
        );
    }

    let config =
        ShardlordConfig::load_from_dir(project_path).context("failed to load configuration")?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        "toml" => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        _ => {
            println!("shardlord Configuration");
            println!("========================\n");

            println!("Cluster:");
            if config.cluster.nodes.is_empty() {
                println!("  (no nodes registered)");
            }
            for (id, conninfo) in &config.cluster.nodes {
                println!("  node {id}: {conninfo}");
            }
            println!();

            println!("Catalog:");
            println!(
                "  conninfo: {}",
                if config.catalog.conninfo.is_empty() {
                    "(unset)"
                } else {
                    config.catalog.conninfo.as_str()
                }
            );
            println!();

            println!("Engine:");
            println!("  cmd_retry_naptime_ms: {}", config.engine.cmd_retry_naptime_ms);
            println!("  poll_interval_ms:     {}", config.engine.poll_interval_ms);
            println!("  sync_replicas:        {}", config.engine.sync_replicas);
            println!("  meta_subscription_name: {}", config.engine.meta_subscription_name);
            println!();

            println!("Logging:");
            println!("  filter: {}", config.logging.filter);
            println!("  json:   {}", config.logging.json);
        }
    }

    Ok(())
}

/// Validate configuration files.
pub fn validate(project: &str) -> Result<()> {
    let project_path = Path::new(project);

    println!("Validating configuration in {}...", project_path.display());

    if !Paths::is_initialized(project_path) {
        anyhow::bail!(
            "Project not initialized. Run 'shardlord init' in {} first.",
            project_path.display()
        );
    }

    match ShardlordConfig::load_from_dir(project_path) {
        Ok(config) => match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                Ok(())
            }
            Err(error) => {
                println!("✗ Configuration validation failed:");
                println!("  {error}");
                Err(error.into())
            }
        },
        Err(error) => {
            println!("✗ Configuration failed to load:");
            println!("  {error}");
            Err(error)
        }
    }
}
