//! Task state.
//!
//! A [`Task`] is a discriminated record: a `Failed` variant born dead at
//! construction, or an `Active` variant carrying the common copy state
//! plus per-flavor extensions. Modeling this as a Rust enum -- rather
//! than a struct with nullable fields -- prefers sum types over
//! downcasts, and it makes the invariant that a task in `Failed` state
//! never holds open sessions true by construction, since the `Failed`
//! variant has no session fields to hold one in.

use shardlord_pg::SqlSession;
use shardlord_types::{ChannelName, Lsn, NodeId, PartitionName, TaskId, TaskKind, TaskResult, TaskStep};

use crate::clock::Timestamp;
use crate::error::TaskError;

/// What the scheduler should do with a task after it yields.
pub enum ExecSignal {
    /// The task reached a terminal state this tick.
    Done,
    /// Re-enter the task no earlier than this time.
    WakeMeUp(Timestamp),
    /// Re-enter the task when `token` becomes readable. Reserved
    /// infrastructure -- current code paths use the timeout list almost
    /// exclusively but the readiness infrastructure exists; nothing in
    /// this engine emits it today.
    Epoll(ReadinessToken),
}

/// A registered file descriptor, opaque to everything but the scheduler's
/// readiness primitive. Reserved for future notify-driven waits.
pub type ReadinessToken = i32;

/// One neighbor session in a move task's reconfiguration: the
/// upstream or downstream node, its connection, and the reconfiguration
/// script to run against it.
pub struct NeighborLink {
    pub node: NodeId,
    pub session: Box<dyn SqlSession>,
    /// Redirects this neighbor's publication/subscription to the new
    /// destination.
    pub reconfigure_script: String,
}

/// Move-flavor extension.
pub struct MoveExtension {
    pub prev: Option<NeighborLink>,
    pub next: Option<NeighborLink>,
    /// Enrolls the destination as a synchronous standby on `prev`, run
    /// only when `prev.is_some()` and sync-replicas is enabled.
    pub sync_standby_prev_script: Option<String>,
    /// Enrolls `next` as a synchronous standby on the destination, run
    /// only when `next.is_some()` and sync-replicas is enabled.
    pub sync_standby_next_script: Option<String>,
    /// Accepts incoming replication from `prev` and, if `next` exists,
    /// creates the publication/slot for dst -> next.
    pub dst_reconfigure_script: String,
    /// Which reconfiguration sub-step to resume from if a retry unwinds
    /// mid-phase: a task never re-copies, it resumes reconfiguration
    /// instead.
    pub reconfigure_step: MoveReconfigureStep,
}

/// Sub-steps of move reconfiguration, in a fixed order that must not be
/// reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MoveReconfigureStep {
    RedirectPrev,
    ReconfigureDestination,
    SyncStandbyOnPrev,
    RedirectNext,
    SyncStandbyOnNext,
    UpdateCatalog,
    Done,
}

/// Create-replica-flavor extension.
pub struct CreateReplicaExtension {
    pub drop_copy_subscription_script: String,
    pub create_data_publication_and_slot_script: String,
    pub create_data_subscription_script: String,
    pub sync_standby_script: Option<String>,
    pub release_read_only_script: String,
    pub reconfigure_step: CreateReplicaReconfigureStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CreateReplicaReconfigureStep {
    DropCopySubscription,
    CreateDataPublicationAndSlot,
    CreateDataSubscription,
    SyncStandbyAndReleaseReadOnly,
    UpdateCatalog,
    Done,
}

/// Flavor-specific payload.
pub enum Flavor {
    Move(MoveExtension),
    CreateReplica(CreateReplicaExtension),
}

/// The common copy state every active task carries.
pub struct ActiveTask {
    pub id: TaskId,
    pub partition: PartitionName,
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: TaskKind,
    pub channel: ChannelName,
    pub relation: String,

    pub src_session: Box<dyn SqlSession>,
    pub dst_session: Box<dyn SqlSession>,

    /// Drop any stale copy subscription of this channel's name on the
    /// destination.
    pub drop_dest_subscription_script: String,
    /// Drop-if-exists then create the publication and slot on the source.
    pub create_publication_and_slot_script: String,
    /// Drop-if-exists the target table, create it shaped like the root
    /// relation, and subscribe.
    pub create_table_and_subscription_script: String,
    /// Drop write privileges on the source relation.
    pub read_only_script: String,

    pub step: TaskStep,
    pub result: TaskResult,
    /// Captured once, when the source is marked read-only, and never
    /// decreasing after that.
    pub sync_point: Option<Lsn>,
    pub next_wake: Option<Timestamp>,
    pub readiness_token: Option<ReadinessToken>,

    pub flavor: Flavor,
}

impl ActiveTask {
    pub fn is_terminal(&self) -> bool {
        self.result.is_terminal()
    }

    /// Mark this task's common `result` field terminal and close every
    /// session it holds, preserving the invariant that a terminal task
    /// never holds a connection open.
    pub fn finish(&mut self, result: TaskResult) {
        debug_assert!(result.is_terminal());
        self.result = result;
        self.close_sessions();
    }

    pub fn close_sessions(&mut self) {
        self.src_session.close();
        self.dst_session.close();
        match &mut self.flavor {
            Flavor::Move(ext) => {
                if let Some(link) = ext.prev.as_mut() {
                    link.session.close();
                }
                if let Some(link) = ext.next.as_mut() {
                    link.session.close();
                }
            }
            Flavor::CreateReplica(_) => {}
        }
    }
}

/// A copy task: either permanently failed at birth, or active and
/// progressing through the copy state machine.
pub enum Task {
    Failed {
        id: TaskId,
        partition: PartitionName,
        src: NodeId,
        dst: NodeId,
        kind: TaskKind,
        reason: TaskError,
    },
    Active(Box<ActiveTask>),
}

impl Task {
    pub fn failed(
        id: TaskId,
        partition: PartitionName,
        src: NodeId,
        dst: NodeId,
        kind: TaskKind,
        reason: TaskError,
    ) -> Self {
        Task::Failed {
            id,
            partition,
            src,
            dst,
            kind,
            reason,
        }
    }

    pub fn id(&self) -> TaskId {
        match self {
            Task::Failed { id, .. } => *id,
            Task::Active(t) => t.id,
        }
    }

    pub fn result(&self) -> TaskResult {
        match self {
            Task::Failed { .. } => TaskResult::Failed,
            Task::Active(t) => t.result,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.result().is_terminal()
    }

    /// Mark an active task Done and close its sessions, preserving the
    /// invariant that a terminal task never holds a connection open.
    pub fn finish(&mut self, result: TaskResult) {
        debug_assert!(result.is_terminal());
        if let Task::Active(t) = self {
            t.result = result;
            t.close_sessions();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_task_result_is_always_failed() {
        let task = Task::failed(
            TaskId::new(1),
            PartitionName::from("p"),
            NodeId::new(1),
            NodeId::new(2),
            TaskKind::MovePrimary,
            TaskError::SourceEqualsDestination(NodeId::new(1)),
        );
        assert_eq!(task.result(), TaskResult::Failed);
        assert!(task.is_terminal());
    }

    #[test]
    fn move_reconfigure_steps_are_ordered() {
        assert!(MoveReconfigureStep::RedirectPrev < MoveReconfigureStep::ReconfigureDestination);
        assert!(MoveReconfigureStep::ReconfigureDestination < MoveReconfigureStep::SyncStandbyOnPrev);
        assert!(MoveReconfigureStep::SyncStandbyOnPrev < MoveReconfigureStep::RedirectNext);
        assert!(MoveReconfigureStep::RedirectNext < MoveReconfigureStep::SyncStandbyOnNext);
        assert!(MoveReconfigureStep::SyncStandbyOnNext < MoveReconfigureStep::UpdateCatalog);
        assert!(MoveReconfigureStep::UpdateCatalog < MoveReconfigureStep::Done);
    }
}
