//! shardlord: the control plane for a sharded PostgreSQL cluster.
//!
//! Drives the partition copy engine's two task flavors -- move a
//! partition and create a replica -- and exposes the rest of the
//! operator-facing command surface. Node add/remove, table-partitioning
//! and the rebalancer are external collaborators the copy engine only
//! ever executes the output of; their command variants here print a
//! pointer to where that work actually happens rather than doing it.
//!
//! # Quick Start
//!
//! ```bash
//! shardlord init ./cluster
//! cd cluster && $EDITOR shardlord.toml   # register [cluster.nodes] and [catalog]
//! shardlord cluster status
//! shardlord cluster move-partition orders_3 --src 1 --dst 2
//! ```

mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};

use style::set_no_color;

/// shardlord - the control plane for sharded PostgreSQL clusters.
#[derive(Parser)]
#[command(name = "shardlord")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Scaffold a new shardlord project directory.
    Init {
        /// Path to the project directory to create.
        #[arg(default_value = ".")]
        path: String,
    },

    /// Configuration management.
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Cluster management and the partition copy engine.
    #[command(subcommand)]
    Cluster(ClusterCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration.
    Show {
        /// Project directory (holds `shardlord.toml`).
        #[arg(long, default_value = ".")]
        project: String,

        /// Output format: text, toml, or json.
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Validate configuration files.
    Validate {
        /// Project directory (holds `shardlord.toml`).
        #[arg(long, default_value = ".")]
        project: String,
    },
}

#[derive(Subcommand)]
enum ClusterCommands {
    /// Print the configured worker and catalog connections.
    Status {
        #[arg(long, default_value = ".")]
        project: String,
    },

    /// Move a partition, primary or replica, to a new node.
    MovePartition {
        /// Partition name, e.g. `orders_3`.
        partition: String,

        /// Node id currently holding the partition.
        #[arg(long)]
        src: i32,

        /// Node id to move the partition to.
        #[arg(long)]
        dst: i32,

        #[arg(long, default_value = ".")]
        project: String,
    },

    /// Create a new replica at the tail of a partition's chain.
    CreateReplica {
        /// Partition name, e.g. `orders_3`.
        partition: String,

        /// Node id to create the replica on.
        #[arg(long)]
        dst: i32,

        #[arg(long, default_value = ".")]
        project: String,
    },

    /// Set the cluster-wide synchronous-replication level.
    SetReplicationLevel {
        /// Number of synchronous replicas to require.
        replicas: u32,

        #[arg(long, default_value = ".")]
        project: String,
    },

    /// Register a new worker node (out of scope for this engine).
    AddNode {
        node: i32,
        conninfo: String,
    },

    /// Remove a worker node (out of scope for this engine).
    RemoveNode { node: i32 },

    /// Hash-partition a table (out of scope for this engine).
    PartitionTable {
        table: String,
        #[arg(long, default_value_t = 8)]
        buckets: u32,
    },

    /// Rebalance the cluster (out of scope for this engine).
    Rebalance,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    set_no_color(cli.no_color);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Init { path } => commands::init::run(&path),
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show { project, format } => commands::config::show(&project, &format),
            ConfigCommands::Validate { project } => commands::config::validate(&project),
        },
        Commands::Cluster(cmd) => run_cluster_command(cmd),
    }
}

fn run_cluster_command(cmd: ClusterCommands) -> Result<()> {
    match cmd {
        ClusterCommands::Status { project } => commands::cluster::status(&project),
        ClusterCommands::AddNode { node, conninfo } => {
            commands::cluster::add_node(node, &conninfo)
        }
        ClusterCommands::RemoveNode { node } => commands::cluster::remove_node(node),
        ClusterCommands::PartitionTable { table, buckets } => {
            commands::cluster::partition_table(&table, buckets)
        }
        ClusterCommands::Rebalance => commands::cluster::rebalance(),

        // The copy engine's scheduler is single-threaded and cooperative;
        // a `current_thread` runtime is the direct match for an engine
        // that never spawns worker threads.
        ClusterCommands::MovePartition {
            partition,
            src,
            dst,
            project,
        } => run_current_thread(commands::cluster::move_partition(&partition, src, dst, &project)),

        ClusterCommands::CreateReplica {
            partition,
            dst,
            project,
        } => run_current_thread(commands::cluster::create_replica(&partition, dst, &project)),

        ClusterCommands::SetReplicationLevel { replicas, project } => {
            run_current_thread(commands::cluster::set_replication_level(replicas, &project))
        }
    }
}

fn run_current_thread<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(fut)
}
