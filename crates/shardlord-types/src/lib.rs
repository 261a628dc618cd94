//! # shardlord-types: Core types for shardlord
//!
//! This crate contains the identifier and value types shared between the
//! catalog, SQL-session, and copy-engine crates:
//! - Cluster topology ids ([`NodeId`], [`TaskId`])
//! - Partition naming ([`PartitionName`], [`ChannelName`])
//! - WAL position tracking ([`Lsn`])
//! - Task shape ([`TaskKind`], [`TaskStep`], [`TaskResult`])

use std::fmt::{self, Display};
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs
// ============================================================================

/// Unique identifier for a worker database node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(i32);

impl NodeId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for NodeId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing identifier handed out by the scheduler when a
/// task is registered. Used only for logging and test assertions -- the
/// engine never looks tasks up by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// The name of a hash-partitioned shard, e.g. `"orders_3"`.
///
/// Carried as an owned `String` rather than an interned symbol: the engine
/// only ever holds a handful of these alive at once (one per in-flight
/// task), so interning buys nothing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionName(String);

impl PartitionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartitionName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A deterministic logical-replication channel name, of the form
/// `shardman_copy_<part>_<src>_<dst>` or `shardman_data_<part>_<pub>_<sub>`.
///
/// Injective over `(part, src, dst)` by construction: the
/// triple is embedded verbatim, and partition names are themselves
/// restricted (by the catalog, out of scope here) to the identifier
/// characters Postgres allows, so no two distinct triples can collide
/// after string concatenation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelName(String);

impl ChannelName {
    /// The copy channel used for the initial bulk-copy + catch-up phase.
    pub fn copy(part: &PartitionName, src: NodeId, dst: NodeId) -> Self {
        Self(format!("shardman_copy_{part}_{src}_{dst}"))
    }

    /// The durable data channel a replica keeps after the copy finishes.
    pub fn data(part: &PartitionName, publisher: NodeId, subscriber: NodeId) -> Self {
        Self(format!("shardman_data_{part}_{publisher}_{subscriber}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// WAL position
// ============================================================================

/// A parsed PostgreSQL WAL position (`pg_lsn`).
///
/// The wire representation is textual, `"<hi>/<lo>"` with both halves
/// hex-encoded; comparisons treat these as a single unsigned 64-bit
/// value with the high 32 bits before the `/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

/// Error parsing a textual `pg_lsn` value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LsnParseError {
    #[error("lsn value has no '/' separator: {0:?}")]
    MissingSeparator(String),
    #[error("lsn half is not valid hex: {0}")]
    InvalidHex(#[from] ParseIntError),
}

impl FromStr for Lsn {
    type Err = LsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| LsnParseError::MissingSeparator(s.to_string()))?;
        let hi = u32::from_str_radix(hi, 16)?;
        let lo = u32::from_str_radix(lo, 16)?;
        Ok(Self((u64::from(hi) << 32) | u64::from(lo)))
    }
}

// ============================================================================
// Task shape
// ============================================================================

/// Which flavor of copy task is running.
///
/// Two task flavors share this machinery: move a partition (primary or
/// replica, up to four nodes involved) and create a new replica at the
/// tail of a replica chain (two nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    MovePrimary,
    MoveReplica,
    CreateReplica,
}

impl TaskKind {
    pub fn is_move(self) -> bool {
        matches!(self, TaskKind::MovePrimary | TaskKind::MoveReplica)
    }
}

/// Step within the copy state machine. Monotonically advances and never
/// moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStep {
    StartTablesync,
    StartFinalsync,
    Finalize,
    Done,
}

/// Terminal or in-flight result of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskResult {
    InProgress,
    Success,
    Failed,
}

impl TaskResult {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskResult::InProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_is_injective_over_triple() {
        let part_a = PartitionName::from("orders_1");
        let part_b = PartitionName::from("orders_2");
        let a = ChannelName::copy(&part_a, NodeId::new(1), NodeId::new(2));
        let b = ChannelName::copy(&part_b, NodeId::new(1), NodeId::new(2));
        let c = ChannelName::copy(&part_a, NodeId::new(2), NodeId::new(1));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "shardman_copy_orders_1_1_2");
    }

    #[test]
    fn lsn_roundtrips_through_text() {
        let lsn: Lsn = "16/B374D848".parse().unwrap();
        assert_eq!(lsn.to_string(), "16/B374D848");
    }

    #[test]
    fn lsn_high_bits_precede_separator() {
        // 1/0 must be greater than 0/FFFFFFFF -- the high half dominates.
        let low: Lsn = "0/FFFFFFFF".parse().unwrap();
        let high: Lsn = "1/0".parse().unwrap();
        assert!(high > low);
    }

    #[test]
    fn lsn_rejects_missing_separator() {
        assert!("not-an-lsn".parse::<Lsn>().is_err());
    }

    #[test]
    fn task_step_ordering_matches_progression() {
        assert!(TaskStep::StartTablesync < TaskStep::StartFinalsync);
        assert!(TaskStep::StartFinalsync < TaskStep::Finalize);
        assert!(TaskStep::Finalize < TaskStep::Done);
    }
}
