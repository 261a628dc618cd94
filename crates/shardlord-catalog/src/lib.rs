//! # shardlord-catalog
//!
//! The metadata catalog contract the copy engine depends on.
//!
//! This crate never owns the catalog's storage or its SQL schema's evolution
//! -- the owning process (table-partitioning setup, node add/remove, the
//! rebalancer) is out of scope. What lives here is the narrow surface the
//! engine actually consumes:
//!
//! - [`Catalog`]: the trait the engine polls at task-construction time and
//!   writes through exactly once, at task completion, via the final
//!   metadata-update transaction.
//! - [`scripts`]: builders for the semicolon-separated scripts the engine
//!   issues against *worker* connections, never against the catalog
//!   itself.
//! - [`PARTITIONS_DDL`]: the schema the engine assumes `partitions` has,
//!   pinned down in one place as documentation; the engine never runs DDL
//!   against the catalog.

mod memory;
pub mod pg;
pub mod scripts;

pub use memory::InMemoryCatalog;
pub use pg::PgCatalog;

use async_trait::async_trait;
use shardlord_types::{Lsn, NodeId, PartitionName};
use thiserror::Error;

/// The worker-side catalog schema the engine depends on.
///
/// A replica chain is a doubly-linked list keyed by partition name: the
/// unique primary row has `prv IS NULL`, the tail has `nxt IS NULL`.
///
/// This is documentation only -- the engine never issues this DDL itself;
/// the catalog's owning process does, out of scope here.
pub const PARTITIONS_DDL: &str = r"
CREATE TABLE partitions (
    part_name TEXT NOT NULL,
    owner     INT  NOT NULL,
    prv       INT,
    nxt       INT,
    relation  TEXT NOT NULL
);
";

/// Errors surfaced by [`Catalog`] implementations.
///
/// Every variant here is a construction-time failure: it fails a task
/// permanently at birth, never a retryable transport or not-ready
/// condition (those belong to `shardlord-pg`).
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("partition {0} has no row in the catalog")]
    PartitionNotFound(PartitionName),

    #[error("node {1} does not hold a copy of partition {0}")]
    NodeNotInChain(PartitionName, NodeId),

    #[error("partition {0} already has a row for node {1}")]
    DuplicateChainMember(PartitionName, NodeId),

    #[error("catalog backend error: {0}")]
    Backend(String),
}

/// The subset of the metadata catalog the copy engine depends on.
///
/// All methods are read-only lookups against the replica-chain shape
/// except [`apply_move`](Catalog::apply_move) and
/// [`apply_create_replica`](Catalog::apply_create_replica), which are the
/// *only* two ways the engine ever mutates catalog state: the task writes
/// metadata rows only via the final update transaction, and only on
/// success.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// The node holding the primary (head, `prv IS NULL`) copy of `part`.
    async fn primary_owner(&self, part: &PartitionName) -> Result<NodeId, CatalogError>;

    /// The node holding the tail (`nxt IS NULL`) copy of `part`.
    async fn tail_owner(&self, part: &PartitionName) -> Result<NodeId, CatalogError>;

    /// The node downstream of `node` in `part`'s replica chain, if any.
    async fn next_neighbor(
        &self,
        part: &PartitionName,
        node: NodeId,
    ) -> Result<Option<NodeId>, CatalogError>;

    /// The node upstream of `node` in `part`'s replica chain, if any.
    async fn prev_neighbor(
        &self,
        part: &PartitionName,
        node: NodeId,
    ) -> Result<Option<NodeId>, CatalogError>;

    /// The root relation name backing `part` (used to shape the
    /// destination's `CREATE TABLE LIKE`).
    async fn relation_of(&self, part: &PartitionName) -> Result<String, CatalogError>;

    /// Whether `node` already holds a copy of `part`. The destination
    /// must not already hold the partition at task construction time.
    async fn partition_exists_on(
        &self,
        part: &PartitionName,
        node: NodeId,
    ) -> Result<bool, CatalogError>;

    /// The cluster-wide synchronous-replication toggle. The engine only
    /// ever reads this to decide whether to run the "ensure sync standby"
    /// reconfiguration sub-steps -- the command that flips it is out of
    /// scope, like the rebalancer.
    async fn sync_replicas_enabled(&self) -> Result<bool, CatalogError>;

    /// The shardlord's own current commit position, used as the comparand
    /// for the catalog-freshness barrier: the worker's
    /// `shardman_meta_sub` subscription must have replayed at least this
    /// far before a task may touch it.
    async fn current_commit_lsn(&self) -> Result<Lsn, CatalogError>;

    /// The final, atomic metadata update for a completed move task:
    /// rewrite `owner`/`prv`/`nxt` wherever they reference `src` for
    /// `part`, pointing them at `dst` instead.
    async fn apply_move(
        &self,
        part: &PartitionName,
        src: NodeId,
        dst: NodeId,
    ) -> Result<(), CatalogError>;

    /// The final, atomic metadata update for a completed create-replica
    /// task: insert the new tail row
    /// `(part, new_node, prv = old_tail, nxt = NULL, relation)` and update
    /// the former tail's `nxt` to point at `new_node`.
    async fn apply_create_replica(
        &self,
        part: &PartitionName,
        old_tail: NodeId,
        new_node: NodeId,
        relation: &str,
    ) -> Result<(), CatalogError>;

    /// Catalog-only metadata update for the cluster's replication level --
    /// it does not itself run the copy engine. Exposed for CLI
    /// completeness; its real body (rewriting `synchronous_standby_names`
    /// cluster-wide) is an external collaborator's job, out of scope
    /// alongside the rebalancer.
    async fn set_replication_level(&self, _replicas: u32) -> Result<(), CatalogError> {
        Err(CatalogError::Backend(
            "set_replication_level is implemented by the catalog's owning process, \
             out of scope for the copy engine"
                .to_string(),
        ))
    }
}
