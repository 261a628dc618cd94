//! The controller's event loop.
//!
//! A single-threaded scheduler drives every active task to completion by
//! alternating between two wait primitives: a timeout list, kept as a
//! min-heap ordered on wake time, and a readiness set, kept as a map from
//! registered file descriptor to the task waiting on it. Current code
//! paths use the timeout list almost exclusively but the readiness
//! infrastructure exists -- nothing in [`crate::copy`] or
//! [`crate::reconfigure`] emits [`ExecSignal::Epoll`] today, but the
//! [`Readiness`] trait is wired in end to end so a future step can start
//! emitting it without touching this module.
//!
//! One iteration of the loop: find every task whose wake time has
//! already passed (or whose descriptor is already readable), dispatch
//! each exactly once, and fold its yielded [`ExecSignal`] back into the
//! timeout list, the readiness set, or the finished-outcomes list. A task
//! whose `step` has reached [`TaskStep::Done`] is dispatched to
//! [`crate::reconfigure`] instead of [`crate::copy`] -- the two modules
//! divide the copy and reconfiguration state machines along exactly that
//! seam.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use shardlord_catalog::Catalog;
use shardlord_types::{NodeId, PartitionName, TaskId, TaskKind, TaskResult, TaskStep};
use tracing::Instrument;

use crate::clock::{self, Timestamp};
use crate::error::ControllerError;
use crate::settings::EngineSettings;
use crate::task::{ActiveTask, ExecSignal, ReadinessToken, Task};
use crate::{copy, reconfigure};

/// What a task left behind once it reached a terminal state.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub partition: PartitionName,
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: TaskKind,
    pub result: TaskResult,
}

/// The readiness primitive the scheduler waits on for
/// [`ExecSignal::Epoll`]. Abstracted so tests can drive the reserved
/// code path without touching a real file descriptor.
#[async_trait::async_trait]
pub trait Readiness: Send + Sync {
    async fn wait_readable(&self, token: ReadinessToken) -> Result<(), ControllerError>;
}

/// Waits on a raw file descriptor becoming readable via Tokio's reactor.
///
/// [`tokio::io::unix::AsyncFd`] requires an [`std::os::fd::AsRawFd`]
/// implementor; [`BorrowedFd`] supplies one without taking ownership of
/// the descriptor and without any `unsafe` block of its own (the
/// workspace forbids `unsafe_code` outright), since `AsRawFd` itself is a
/// safe trait to implement over a plain `i32`.
#[cfg(unix)]
mod unix_readiness {
    use std::os::fd::{AsRawFd, RawFd};

    use tokio::io::unix::AsyncFd;

    use super::{ControllerError, Readiness, ReadinessToken};

    struct BorrowedFd(RawFd);

    impl AsRawFd for BorrowedFd {
        fn as_raw_fd(&self) -> RawFd {
            self.0
        }
    }

    /// The default [`Readiness`] used outside of tests.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct TokioReadiness;

    #[async_trait::async_trait]
    impl Readiness for TokioReadiness {
        async fn wait_readable(&self, token: ReadinessToken) -> Result<(), ControllerError> {
            let guard = AsyncFd::new(BorrowedFd(token))
                .map_err(|error| ControllerError::Readiness(error.to_string()))?;
            guard
                .readable()
                .await
                .map_err(|error| ControllerError::Readiness(error.to_string()))?
                .clear_ready();
            Ok(())
        }
    }
}

#[cfg(unix)]
pub use unix_readiness::TokioReadiness;

/// Non-Unix fallback: the readiness path is reserved infrastructure
/// (nothing emits [`ExecSignal::Epoll`] today), so failing loudly if it
/// is ever reached on an unsupported platform is preferable to silently
/// hanging.
#[cfg(not(unix))]
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioReadiness;

#[cfg(not(unix))]
#[async_trait::async_trait]
impl Readiness for TokioReadiness {
    async fn wait_readable(&self, _token: ReadinessToken) -> Result<(), ControllerError> {
        Err(ControllerError::Readiness(
            "readiness primitive is unavailable on this platform".to_string(),
        ))
    }
}

/// Drives every submitted [`Task`] to a terminal state.
pub struct Scheduler<C, R = TokioReadiness> {
    catalog: C,
    settings: EngineSettings,
    readiness: R,
    tasks: HashMap<TaskId, Box<ActiveTask>>,
    timeouts: BinaryHeap<Reverse<(Timestamp, TaskId)>>,
    epoll: HashMap<TaskId, ReadinessToken>,
    outcomes: Vec<TaskOutcome>,
}

impl<C: Catalog> Scheduler<C, TokioReadiness> {
    pub fn new(catalog: C, settings: EngineSettings) -> Self {
        Self::with_readiness(catalog, settings, TokioReadiness)
    }
}

impl<C: Catalog, R: Readiness> Scheduler<C, R> {
    pub fn with_readiness(catalog: C, settings: EngineSettings, readiness: R) -> Self {
        Self {
            catalog,
            settings,
            readiness,
            tasks: HashMap::new(),
            timeouts: BinaryHeap::new(),
            epoll: HashMap::new(),
            outcomes: Vec::new(),
        }
    }

    /// Register tasks with the scheduler.
    /// A task born [`Task::Failed`] never enters the loop at all -- it
    /// goes straight to the outcomes list, preserving the invariant that
    /// a failed task never holds a session open.
    pub fn submit(&mut self, tasks: impl IntoIterator<Item = Task>) {
        for task in tasks {
            match task {
                Task::Failed { id, partition, src, dst, kind, reason } => {
                    tracing::warn!(task = %id, %reason, "task failed at construction");
                    self.outcomes.push(TaskOutcome {
                        id,
                        partition,
                        src,
                        dst,
                        kind,
                        result: TaskResult::Failed,
                    });
                }
                Task::Active(active) => {
                    let id = active.id;
                    self.timeouts.push(Reverse((clock::now(), id)));
                    self.tasks.insert(id, active);
                }
            }
        }
    }

    /// How many tasks are still in flight.
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// Run until every submitted task has reached a terminal state.
    pub async fn run_to_completion(self) -> Vec<TaskOutcome> {
        self.run_until(std::future::pending()).await
    }

    /// Run until every task finishes or `terminate` resolves, whichever
    /// comes first. On early termination every in-flight task's sessions
    /// are closed: a controller that is asked to stop closes its
    /// connections rather than abandoning them open.
    pub async fn run_until(mut self, terminate: impl Future<Output = ()>) -> Vec<TaskOutcome> {
        tokio::pin!(terminate);

        loop {
            if self.tasks.is_empty() {
                break;
            }

            tokio::select! {
                () = &mut terminate => {
                    self.shutdown();
                    break;
                }
                due = self.wait_for_due_tasks() => {
                    for id in due {
                        self.dispatch(id).await;
                    }
                }
            }
        }

        self.outcomes
    }

    /// Block until at least one task is due: either its timeout has
    /// already elapsed, or its registered descriptor is readable. Ties
    /// in the timeout list resolve in `TaskId` order, matching the
    /// `BinaryHeap<Reverse<(Timestamp, TaskId)>>` min-heap's natural
    /// ordering.
    async fn wait_for_due_tasks(&mut self) -> Vec<TaskId> {
        let now = clock::now();
        let already_due = self.drain_due_timeouts(now);
        if !already_due.is_empty() {
            return already_due;
        }

        enum Woke {
            Timeout,
            Ready(TaskId),
        }

        let woke = {
            let sleep = match self.timeouts.peek() {
                Some(Reverse((when, _))) => *when,
                None => clock::now_plus(self.settings.poll_interval_ms),
            };

            let mut waits: FuturesUnordered<_> = self
                .epoll
                .iter()
                .map(|(&id, &token)| async move {
                    let outcome = self.readiness.wait_readable(token).await;
                    (id, outcome)
                })
                .collect();

            tokio::select! {
                () = tokio::time::sleep_until(sleep) => Woke::Timeout,
                Some((id, outcome)) = waits.next() => {
                    if let Err(error) = outcome {
                        tracing::warn!(task = %id, %error, "readiness wait failed, falling back to timeout");
                    }
                    Woke::Ready(id)
                }
                else => Woke::Timeout,
            }
        };

        match woke {
            Woke::Timeout => self.drain_due_timeouts(clock::now()),
            Woke::Ready(id) => {
                self.epoll.remove(&id);
                vec![id]
            }
        }
    }

    fn drain_due_timeouts(&mut self, now: Timestamp) -> Vec<TaskId> {
        let mut due = Vec::new();
        while let Some(Reverse((when, _))) = self.timeouts.peek() {
            if *when > now {
                break;
            }
            let Reverse((_, id)) = self.timeouts.pop().expect("peeked above");
            due.push(id);
        }
        due
    }

    /// Run one step for `id` and fold the resulting [`ExecSignal`] back
    /// into the scheduler's wait lists.
    async fn dispatch(&mut self, id: TaskId) {
        let Some(mut active) = self.tasks.remove(&id) else {
            return;
        };

        let span = tracing::debug_span!("task_tick", task = %id, step = ?active.step);
        let signal = async {
            if active.step == TaskStep::Done {
                reconfigure::execute(active.as_mut(), &self.catalog, &self.settings).await
            } else {
                copy::execute(active.as_mut(), &self.catalog, &self.settings).await
            }
        }
        .instrument(span)
        .await;

        match signal {
            ExecSignal::Done => {
                self.outcomes.push(outcome_of(&active));
            }
            ExecSignal::WakeMeUp(when) => {
                active.next_wake = Some(when);
                self.timeouts.push(Reverse((when, id)));
                self.tasks.insert(id, active);
            }
            ExecSignal::Epoll(token) => {
                active.readiness_token = Some(token);
                self.epoll.insert(id, token);
                self.tasks.insert(id, active);
            }
        }
    }

    /// Close every outstanding task's sessions without recording an
    /// outcome for them.
    fn shutdown(&mut self) {
        for (_, active) in self.tasks.iter_mut() {
            active.close_sessions();
        }
        self.tasks.clear();
        self.epoll.clear();
        self.timeouts.clear();
    }
}

fn outcome_of(active: &ActiveTask) -> TaskOutcome {
    TaskOutcome {
        id: active.id,
        partition: active.partition.clone(),
        src: active.src,
        dst: active.dst,
        kind: active.kind,
        result: active.result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardlord_catalog::InMemoryCatalog;
    use shardlord_pg::FakeSession;
    use shardlord_types::{ChannelName, TaskResult};

    use crate::task::{Flavor, MoveExtension, MoveReconfigureStep};

    fn move_task(id: u64, step: TaskStep) -> Task {
        let partition = PartitionName::from("p");
        let src = NodeId::new(1);
        let dst = NodeId::new(2);
        Task::Active(Box::new(ActiveTask {
            id: TaskId::new(id),
            partition: partition.clone(),
            src,
            dst,
            kind: TaskKind::MovePrimary,
            channel: ChannelName::copy(&partition, src, dst),
            relation: "r".to_string(),
            src_session: Box::new(FakeSession::new().push_query_ok("0/0")),
            dst_session: Box::new(FakeSession::new().push_query_ok("0/0")),
            drop_dest_subscription_script: "DROP SUBSCRIPTION IF EXISTS x".to_string(),
            create_publication_and_slot_script: "SELECT 1".to_string(),
            create_table_and_subscription_script: "SELECT 1".to_string(),
            read_only_script: "SELECT 1".to_string(),
            step,
            result: TaskResult::InProgress,
            sync_point: None,
            next_wake: None,
            readiness_token: None,
            flavor: Flavor::Move(MoveExtension {
                prev: None,
                next: None,
                sync_standby_prev_script: None,
                sync_standby_next_script: None,
                dst_reconfigure_script: String::new(),
                reconfigure_step: MoveReconfigureStep::RedirectPrev,
            }),
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn submits_failed_task_directly_to_outcomes() {
        let mut scheduler = Scheduler::new(InMemoryCatalog::new(), EngineSettings::default());
        scheduler.submit([Task::failed(
            TaskId::new(1),
            PartitionName::from("p"),
            NodeId::new(1),
            NodeId::new(2),
            TaskKind::MovePrimary,
            crate::error::TaskError::SourceEqualsDestination(NodeId::new(1)),
        )]);

        assert_eq!(scheduler.outstanding(), 0);
        let outcomes = scheduler.run_to_completion().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result, TaskResult::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn drains_a_done_move_task_to_success() {
        let catalog = InMemoryCatalog::new();
        catalog.seed_primary(&PartitionName::from("p"), NodeId::new(1), "r");

        let mut scheduler = Scheduler::new(catalog, EngineSettings::default());
        scheduler.submit([move_task(1, TaskStep::Done)]);

        let outcomes = scheduler.run_to_completion().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result, TaskResult::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn multiple_tasks_all_reach_terminal_state() {
        let catalog = InMemoryCatalog::new();
        catalog.seed_primary(&PartitionName::from("p"), NodeId::new(1), "r");

        let mut scheduler = Scheduler::new(catalog, EngineSettings::default());
        scheduler.submit([move_task(1, TaskStep::Done), move_task(2, TaskStep::Done)]);

        let outcomes = scheduler.run_to_completion().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result == TaskResult::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_on_terminate_closes_sessions_without_recording_outcomes() {
        let catalog = InMemoryCatalog::new();
        let mut scheduler = Scheduler::new(catalog, EngineSettings::default());
        scheduler.submit([move_task(1, TaskStep::StartTablesync)]);

        let outcomes = scheduler.run_until(std::future::ready(())).await;
        assert!(outcomes.is_empty());
    }
}
