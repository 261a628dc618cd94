//! Error taxonomy for the copy engine.
//!
//! Two of the engine's four error kinds get their own type here:
//! `TaskError` (construction errors, which fail a task permanently at
//! birth) and `ControllerError` (unrecoverable, process-ending errors).
//! The other two -- transport and remote-execution errors -- are
//! `shardlord_pg::PgError`, and are always locally recovered into a
//! scheduled retry; they never reach a `Task`'s terminal state.

use shardlord_catalog::CatalogError;
use shardlord_types::{NodeId, PartitionName};
use thiserror::Error;

/// Fails a task permanently at construction. Construction validates
/// preconditions against the catalog; on precondition violation the
/// task is born `Failed`.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("source and destination node must differ, got {0} for both")]
    SourceEqualsDestination(NodeId),

    #[error("destination {1} already holds a copy of partition {0}")]
    DestinationAlreadyHoldsPartition(PartitionName, NodeId),

    #[error("source {1} does not hold partition {0}")]
    SourceDoesNotHoldPartition(PartitionName, NodeId),

    #[error("catalog lookup failed during task construction: {0}")]
    Catalog(#[from] CatalogError),

    #[error("no connection string configured for node {0}")]
    MissingConnInfo(NodeId),
}

/// Unrecoverable; the controller process terminates and is restarted by
/// its supervisor. `shardlord-cli` maps this to a non-zero exit code
/// after logging at `error`.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("failed to build the Tokio runtime: {0}")]
    RuntimeBuild(#[from] std::io::Error),

    #[error("the readiness primitive failed: {0}")]
    Readiness(String),
}
