//! Topology reconfiguration: runs once a task's copy state machine
//! reaches `Done`, and ends in the one-shot metadata-update transaction
//! that makes the move/create visible to the rest of the cluster.
//!
//! Like [`crate::copy`], [`execute`] advances exactly one sub-step per
//! call and resumes from `reconfigure_step` on retry -- a task that fails
//! midway through reconfiguration never re-copies.

use shardlord_catalog::Catalog;
use shardlord_types::TaskResult;

use crate::clock;
use crate::settings::EngineSettings;
use crate::task::{
    ActiveTask, CreateReplicaReconfigureStep, ExecSignal, Flavor, MoveReconfigureStep,
};

enum StepOutcome {
    Advance,
    Retry,
    Terminal(TaskResult),
}

pub async fn execute<C: Catalog>(
    task: &mut ActiveTask,
    catalog: &C,
    settings: &EngineSettings,
) -> ExecSignal {
    enum Phase {
        Move(MoveReconfigureStep),
        CreateReplica(CreateReplicaReconfigureStep),
    }

    let phase = match &task.flavor {
        Flavor::Move(ext) => Phase::Move(ext.reconfigure_step),
        Flavor::CreateReplica(ext) => Phase::CreateReplica(ext.reconfigure_step),
    };

    let outcome = match phase {
        Phase::Move(step) => move_step(task, catalog, step).await,
        Phase::CreateReplica(step) => create_replica_step(task, catalog, step).await,
    };

    match outcome {
        StepOutcome::Advance => ExecSignal::WakeMeUp(clock::now()),
        StepOutcome::Retry => ExecSignal::WakeMeUp(clock::now_plus(settings.cmd_retry_naptime_ms)),
        StepOutcome::Terminal(result) => {
            task.finish(result);
            ExecSignal::Done
        }
    }
}

fn set_move_step(task: &mut ActiveTask, step: MoveReconfigureStep) {
    if let Flavor::Move(ext) = &mut task.flavor {
        ext.reconfigure_step = step;
    }
}

/// The five fixed sub-steps of move reconfiguration: run in this order so
/// every newly-created subscription is matched by an already-existing
/// publication.
async fn move_step<C: Catalog>(task: &mut ActiveTask, catalog: &C, step: MoveReconfigureStep) -> StepOutcome {
    match step {
        MoveReconfigureStep::RedirectPrev => {
            let (script, has_prev) = match &task.flavor {
                Flavor::Move(ext) => (
                    ext.prev.as_ref().map(|link| link.reconfigure_script.clone()),
                    ext.prev.is_some(),
                ),
                Flavor::CreateReplica(_) => unreachable!("move_step on a create-replica task"),
            };
            let _ = has_prev;
            if let Some(script) = script {
                let Flavor::Move(ext) = &mut task.flavor else { unreachable!() };
                let link = ext.prev.as_mut().expect("checked above");
                if link.session.ensure_open().await.is_err() {
                    return StepOutcome::Retry;
                }
                if link.session.run_script(&script).await.is_err() {
                    return StepOutcome::Retry;
                }
            }
            set_move_step(task, MoveReconfigureStep::ReconfigureDestination);
            StepOutcome::Advance
        }

        MoveReconfigureStep::ReconfigureDestination => {
            let script = match &task.flavor {
                Flavor::Move(ext) => ext.dst_reconfigure_script.clone(),
                Flavor::CreateReplica(_) => unreachable!("move_step on a create-replica task"),
            };
            if !script.is_empty() {
                if task.dst_session.ensure_open().await.is_err() {
                    return StepOutcome::Retry;
                }
                if task.dst_session.run_script(&script).await.is_err() {
                    return StepOutcome::Retry;
                }
            }
            set_move_step(task, MoveReconfigureStep::SyncStandbyOnPrev);
            StepOutcome::Advance
        }

        MoveReconfigureStep::SyncStandbyOnPrev => {
            let script = match &task.flavor {
                Flavor::Move(ext) => ext.sync_standby_prev_script.clone(),
                Flavor::CreateReplica(_) => unreachable!("move_step on a create-replica task"),
            };
            if let Some(script) = script {
                let Flavor::Move(ext) = &mut task.flavor else { unreachable!() };
                if let Some(link) = ext.prev.as_mut() {
                    if link.session.run_script(&script).await.is_err() {
                        return StepOutcome::Retry;
                    }
                }
            }
            set_move_step(task, MoveReconfigureStep::RedirectNext);
            StepOutcome::Advance
        }

        MoveReconfigureStep::RedirectNext => {
            let script = match &task.flavor {
                Flavor::Move(ext) => ext.next.as_ref().map(|link| link.reconfigure_script.clone()),
                Flavor::CreateReplica(_) => unreachable!("move_step on a create-replica task"),
            };
            if let Some(script) = script {
                let Flavor::Move(ext) = &mut task.flavor else { unreachable!() };
                let link = ext.next.as_mut().expect("checked above");
                if link.session.ensure_open().await.is_err() {
                    return StepOutcome::Retry;
                }
                if link.session.run_script(&script).await.is_err() {
                    return StepOutcome::Retry;
                }
            }
            set_move_step(task, MoveReconfigureStep::SyncStandbyOnNext);
            StepOutcome::Advance
        }

        MoveReconfigureStep::SyncStandbyOnNext => {
            let script = match &task.flavor {
                Flavor::Move(ext) => ext.sync_standby_next_script.clone(),
                Flavor::CreateReplica(_) => unreachable!("move_step on a create-replica task"),
            };
            if let Some(script) = script {
                if task.dst_session.run_script(&script).await.is_err() {
                    return StepOutcome::Retry;
                }
            }
            set_move_step(task, MoveReconfigureStep::UpdateCatalog);
            StepOutcome::Advance
        }

        MoveReconfigureStep::UpdateCatalog => {
            if catalog.apply_move(&task.partition, task.src, task.dst).await.is_err() {
                return StepOutcome::Retry;
            }
            set_move_step(task, MoveReconfigureStep::Done);
            StepOutcome::Terminal(TaskResult::Success)
        }

        MoveReconfigureStep::Done => StepOutcome::Terminal(TaskResult::Success),
    }
}

fn set_create_replica_step(task: &mut ActiveTask, step: CreateReplicaReconfigureStep) {
    if let Flavor::CreateReplica(ext) = &mut task.flavor {
        ext.reconfigure_step = step;
    }
}

/// Create-replica reconfiguration's fixed order.
async fn create_replica_step<C: Catalog>(
    task: &mut ActiveTask,
    catalog: &C,
    step: CreateReplicaReconfigureStep,
) -> StepOutcome {
    match step {
        CreateReplicaReconfigureStep::DropCopySubscription => {
            let script = match &task.flavor {
                Flavor::CreateReplica(ext) => ext.drop_copy_subscription_script.clone(),
                Flavor::Move(_) => unreachable!("create_replica_step on a move task"),
            };
            if task.dst_session.run_script(&script).await.is_err() {
                return StepOutcome::Retry;
            }
            set_create_replica_step(task, CreateReplicaReconfigureStep::CreateDataPublicationAndSlot);
            StepOutcome::Advance
        }

        CreateReplicaReconfigureStep::CreateDataPublicationAndSlot => {
            let script = match &task.flavor {
                Flavor::CreateReplica(ext) => ext.create_data_publication_and_slot_script.clone(),
                Flavor::Move(_) => unreachable!("create_replica_step on a move task"),
            };
            if task.src_session.run_script(&script).await.is_err() {
                return StepOutcome::Retry;
            }
            set_create_replica_step(task, CreateReplicaReconfigureStep::CreateDataSubscription);
            StepOutcome::Advance
        }

        CreateReplicaReconfigureStep::CreateDataSubscription => {
            let script = match &task.flavor {
                Flavor::CreateReplica(ext) => ext.create_data_subscription_script.clone(),
                Flavor::Move(_) => unreachable!("create_replica_step on a move task"),
            };
            if task.dst_session.run_script(&script).await.is_err() {
                return StepOutcome::Retry;
            }
            set_create_replica_step(task, CreateReplicaReconfigureStep::SyncStandbyAndReleaseReadOnly);
            StepOutcome::Advance
        }

        CreateReplicaReconfigureStep::SyncStandbyAndReleaseReadOnly => {
            let (sync_script, release_script) = match &task.flavor {
                Flavor::CreateReplica(ext) => {
                    (ext.sync_standby_script.clone(), ext.release_read_only_script.clone())
                }
                Flavor::Move(_) => unreachable!("create_replica_step on a move task"),
            };
            if let Some(script) = sync_script {
                if task.src_session.run_script(&script).await.is_err() {
                    return StepOutcome::Retry;
                }
            }
            if task.src_session.run_script(&release_script).await.is_err() {
                return StepOutcome::Retry;
            }
            set_create_replica_step(task, CreateReplicaReconfigureStep::UpdateCatalog);
            StepOutcome::Advance
        }

        CreateReplicaReconfigureStep::UpdateCatalog => {
            if catalog
                .apply_create_replica(&task.partition, task.src, task.dst, &task.relation)
                .await
                .is_err()
            {
                return StepOutcome::Retry;
            }
            set_create_replica_step(task, CreateReplicaReconfigureStep::Done);
            StepOutcome::Terminal(TaskResult::Success)
        }

        CreateReplicaReconfigureStep::Done => StepOutcome::Terminal(TaskResult::Success),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardlord_catalog::InMemoryCatalog;
    use shardlord_pg::FakeSession;
    use shardlord_types::{ChannelName, NodeId, PartitionName, TaskId, TaskStep};

    use crate::task::{CreateReplicaExtension, MoveExtension, NeighborLink};

    fn done_move_task(prev: Option<NeighborLink>, next: Option<NeighborLink>) -> ActiveTask {
        let partition = PartitionName::from("p");
        ActiveTask {
            id: TaskId::new(1),
            partition: partition.clone(),
            src: NodeId::new(1),
            dst: NodeId::new(2),
            kind: shardlord_types::TaskKind::MovePrimary,
            channel: ChannelName::copy(&partition, NodeId::new(1), NodeId::new(2)),
            relation: "r".to_string(),
            src_session: Box::new(FakeSession::new()),
            dst_session: Box::new(FakeSession::new()),
            drop_dest_subscription_script: String::new(),
            create_publication_and_slot_script: String::new(),
            create_table_and_subscription_script: String::new(),
            read_only_script: String::new(),
            step: TaskStep::Done,
            result: TaskResult::InProgress,
            sync_point: Some(shardlord_types::Lsn::ZERO),
            next_wake: None,
            readiness_token: None,
            flavor: Flavor::Move(MoveExtension {
                prev,
                next,
                sync_standby_prev_script: None,
                sync_standby_next_script: None,
                dst_reconfigure_script: String::new(),
                reconfigure_step: MoveReconfigureStep::RedirectPrev,
            }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn move_with_no_neighbors_runs_straight_through_to_catalog_update() {
        let catalog = InMemoryCatalog::new();
        catalog.seed_primary(&PartitionName::from("p"), NodeId::new(1), "r");
        let mut task = done_move_task(None, None);
        let settings = EngineSettings::default();

        for _ in 0..6 {
            if task.is_terminal() {
                break;
            }
            let Flavor::Move(ext) = &task.flavor else { unreachable!() };
            if ext.reconfigure_step == MoveReconfigureStep::Done {
                break;
            }
            reconfigure_once(&mut task, &catalog, &settings).await;
        }

        assert_eq!(task.result, TaskResult::Success);
        let owner = catalog.primary_owner(&PartitionName::from("p")).await.unwrap();
        assert_eq!(owner, NodeId::new(2));
    }

    async fn reconfigure_once<C: Catalog>(task: &mut ActiveTask, catalog: &C, settings: &EngineSettings) {
        let signal = super::execute(task, catalog, settings).await;
        assert!(matches!(signal, ExecSignal::WakeMeUp(_) | ExecSignal::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn create_replica_inserts_tail_row_on_catalog_update() {
        let catalog = InMemoryCatalog::new();
        catalog.seed_primary(&PartitionName::from("p"), NodeId::new(1), "r");
        let partition = PartitionName::from("p");
        let mut task = ActiveTask {
            id: TaskId::new(2),
            partition: partition.clone(),
            src: NodeId::new(1),
            dst: NodeId::new(2),
            kind: shardlord_types::TaskKind::CreateReplica,
            channel: ChannelName::copy(&partition, NodeId::new(1), NodeId::new(2)),
            relation: "r".to_string(),
            src_session: Box::new(FakeSession::new()),
            dst_session: Box::new(FakeSession::new()),
            drop_dest_subscription_script: String::new(),
            create_publication_and_slot_script: String::new(),
            create_table_and_subscription_script: String::new(),
            read_only_script: String::new(),
            step: TaskStep::Done,
            result: TaskResult::InProgress,
            sync_point: Some(shardlord_types::Lsn::ZERO),
            next_wake: None,
            readiness_token: None,
            flavor: Flavor::CreateReplica(CreateReplicaExtension {
                drop_copy_subscription_script: String::new(),
                create_data_publication_and_slot_script: String::new(),
                create_data_subscription_script: String::new(),
                sync_standby_script: None,
                release_read_only_script: String::new(),
                reconfigure_step: CreateReplicaReconfigureStep::DropCopySubscription,
            }),
        };
        let settings = EngineSettings::default();

        loop {
            if task.is_terminal() {
                break;
            }
            reconfigure_once(&mut task, &catalog, &settings).await;
        }

        assert_eq!(task.result, TaskResult::Success);
        let tail = catalog.tail_owner(&partition).await.unwrap();
        assert_eq!(tail, NodeId::new(2));
    }
}
