//! Cluster management commands: the operator-facing surface over the
//! partition copy engine.
//!
//! Each data-moving command here loads configuration, builds exactly one
//! [`shardlord_engine::Task`], and hands it to a single
//! [`shardlord_engine::Scheduler::run_to_completion`] call -- one command,
//! one task, run to completion. Node add/remove, table-partitioning and
//! the rebalancer are out of scope for this engine (external
//! collaborators); their command variants are stubbed here for a complete
//! operator-facing surface.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use shardlord_catalog::{Catalog, PgCatalog};
use shardlord_config::ShardlordConfig;
use shardlord_engine::{
    build_create_replica_task, build_move_task, ConnInfoResolver, EngineSettings, Scheduler,
    TaskError,
};
use shardlord_pg::{PgSession, PgSessionFactory};
use shardlord_types::{NodeId, PartitionName, TaskId, TaskResult};

use crate::style::{colors::SemanticStyle, create_spinner, finish_error, finish_success, print_info_table};

/// Resolves worker connection strings from a loaded cluster config:
/// `shardlord-cli` is the [`ConnInfoResolver`] the engine depends on but
/// never implements itself.
struct ConfigConnInfoResolver<'a> {
    config: &'a ShardlordConfig,
}

#[async_trait]
impl ConnInfoResolver for ConfigConnInfoResolver<'_> {
    async fn conninfo(&self, node: NodeId) -> Result<String, TaskError> {
        self.config
            .cluster
            .connection_string(node)
            .map(str::to_string)
            .ok_or(TaskError::MissingConnInfo(node))
    }
}

fn load_config(project: &str) -> Result<ShardlordConfig> {
    let project_path = Path::new(project);
    ShardlordConfig::load_from_dir(project_path).with_context(|| {
        format!(
            "failed to load configuration from {} -- run 'shardlord init' first",
            project_path.display()
        )
    })
}

fn open_catalog(config: &ShardlordConfig) -> Result<PgCatalog> {
    if config.catalog.conninfo.is_empty() {
        anyhow::bail!("no [catalog] conninfo configured in shardlord.toml");
    }
    Ok(PgCatalog::new(Box::new(PgSession::new(
        &config.catalog.conninfo,
    ))))
}

fn engine_settings(config: &ShardlordConfig) -> EngineSettings {
    EngineSettings {
        cmd_retry_naptime_ms: config.engine.cmd_retry_naptime_ms,
        poll_interval_ms: config.engine.poll_interval_ms,
        sync_replicas: config.engine.sync_replicas,
        meta_subscription_name: config.engine.meta_subscription_name.clone(),
    }
}

/// Move a partition from `src` to `dst`.
pub async fn move_partition(partition: &str, src: i32, dst: i32, project: &str) -> Result<()> {
    let config = load_config(project)?;
    let catalog = open_catalog(&config)?;
    let settings = engine_settings(&config);
    let resolver = ConfigConnInfoResolver { config: &config };

    let sp = create_spinner(&format!(
        "Moving partition {partition} from node {src} to node {dst}..."
    ));

    let task = build_move_task(
        TaskId::new(1),
        &catalog,
        &PgSessionFactory,
        &resolver,
        &settings,
        PartitionName::from(partition),
        NodeId::new(src),
        NodeId::new(dst),
    )
    .await;

    let mut scheduler = Scheduler::new(catalog, settings);
    scheduler.submit([task]);
    let outcomes = scheduler.run_to_completion().await;

    report_outcome(&sp, outcomes.first(), "Move")
}

/// Create a new replica of `partition` at `dst`, placed at the tail of
/// its chain.
pub async fn create_replica(partition: &str, dst: i32, project: &str) -> Result<()> {
    let config = load_config(project)?;
    let catalog = open_catalog(&config)?;
    let settings = engine_settings(&config);
    let resolver = ConfigConnInfoResolver { config: &config };

    let sp = create_spinner(&format!("Creating replica of {partition} on node {dst}..."));

    let task = build_create_replica_task(
        TaskId::new(1),
        &catalog,
        &PgSessionFactory,
        &resolver,
        &settings,
        PartitionName::from(partition),
        NodeId::new(dst),
    )
    .await;

    let mut scheduler = Scheduler::new(catalog, settings);
    scheduler.submit([task]);
    let outcomes = scheduler.run_to_completion().await;

    report_outcome(&sp, outcomes.first(), "Create-replica")
}

fn report_outcome(
    sp: &indicatif::ProgressBar,
    outcome: Option<&shardlord_engine::TaskOutcome>,
    verb: &str,
) -> Result<()> {
    match outcome {
        Some(o) if o.result == TaskResult::Success => {
            finish_success(sp, &format!("{verb} completed: task {}", o.id));
            Ok(())
        }
        Some(o) => {
            finish_error(sp, &format!("{verb} failed: task {}", o.id));
            anyhow::bail!("task {} ended in state {:?}", o.id, o.result)
        }
        None => {
            finish_error(sp, &format!("{verb} produced no outcome"));
            anyhow::bail!("scheduler returned no outcome for the submitted task")
        }
    }
}

/// Set the cluster-wide synchronous-replication level. A catalog-only
/// metadata update; it does not itself run the copy engine.
pub async fn set_replication_level(replicas: u32, project: &str) -> Result<()> {
    let config = load_config(project)?;
    let catalog = open_catalog(&config)?;

    catalog
        .set_replication_level(replicas)
        .await
        .context("failed to update replication level")?;

    println!("{} Replication level set to {replicas}", "✓".success());
    Ok(())
}

/// Print the configured worker and catalog connections.
pub fn status(project: &str) -> Result<()> {
    let config = load_config(project)?;

    println!();
    println!("Cluster Status");
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Node").fg(Color::Blue),
        Cell::new("Connection").fg(Color::Blue),
    ]);

    for (id, conninfo) in &config.cluster.nodes {
        table.add_row(vec![Cell::new(id), Cell::new(conninfo)]);
    }

    println!("{table}");
    println!();

    let catalog_display = if config.catalog.conninfo.is_empty() {
        "(unset)".to_string()
    } else {
        config.catalog.conninfo.clone()
    };
    let nodes_registered = config.cluster.nodes.len().to_string();
    let sync_replicas = if config.engine.sync_replicas { "enabled" } else { "disabled" };
    print_info_table(&[
        ("Catalog", catalog_display.as_str()),
        ("Nodes registered", nodes_registered.as_str()),
        ("Synchronous replicas", sync_replicas),
    ]);

    Ok(())
}

/// Register a new worker node. Node registration is an external
/// collaborator's workflow, out of scope for this engine -- this command
/// exists for the operator-facing surface's shape, not its behavior.
pub fn add_node(_node: i32, _conninfo: &str) -> Result<()> {
    println!("add-node is not implemented in this engine (out of scope).");
    println!("Register the node's connection string directly in shardlord.toml's [cluster.nodes] table instead.");
    Ok(())
}

/// Remove a worker node. Out of scope, like [`add_node`].
pub fn remove_node(_node: i32) -> Result<()> {
    println!("remove-node is not implemented in this engine (out of scope).");
    Ok(())
}

/// Hash-partition a table. Out of scope: table-partitioning setup is an
/// external collaborator's workflow.
pub fn partition_table(_table: &str, _buckets: u32) -> Result<()> {
    println!("partition-table is not implemented in this engine (out of scope).");
    Ok(())
}

/// Rebalance the cluster. Out of scope: the rebalancer's policy for
/// deciding *which* moves to issue lives outside this engine, which only
/// carries out individual move/create-replica tasks once decided.
pub fn rebalance() -> Result<()> {
    println!("rebalance is not implemented in this engine (out of scope).");
    println!("This engine executes individual move-partition / create-replica tasks; a rebalancer decides which ones to issue.");
    Ok(())
}
