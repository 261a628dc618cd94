//! The copy state machine: StartTablesync -> StartFinalsync
//! -> Finalize. Each step is idempotent with respect to a partially-applied
//! prior attempt -- every script begins with a drop-if-exists of the object
//! it is about to (re)create.
//!
//! [`execute`] runs exactly one step per call; the scheduler re-enters a
//! task that advances its `step` on the very next tick (it returns
//! `WakeMeUp(now())` rather than looping internally), and dispatches to
//! [`crate::reconfigure`] once `step` reaches `Done`.

use shardlord_catalog::Catalog;
use shardlord_pg::PgError;
use shardlord_types::{Lsn, TaskStep};

use crate::clock;
use crate::settings::EngineSettings;
use crate::task::{ActiveTask, ExecSignal};

enum StepOutcome {
    Advance,
    Retry,
    Poll,
}

pub async fn execute<C: Catalog>(
    task: &mut ActiveTask,
    catalog: &C,
    settings: &EngineSettings,
) -> ExecSignal {
    let outcome = match task.step {
        TaskStep::StartTablesync => step_a(task, catalog, settings).await,
        TaskStep::StartFinalsync => step_b(task).await,
        TaskStep::Finalize => step_c(task).await,
        TaskStep::Done => StepOutcome::Advance,
    };

    match outcome {
        StepOutcome::Advance => ExecSignal::WakeMeUp(clock::now()),
        StepOutcome::Retry => ExecSignal::WakeMeUp(clock::now_plus(settings.cmd_retry_naptime_ms)),
        StepOutcome::Poll => ExecSignal::WakeMeUp(clock::now_plus(settings.poll_interval_ms)),
    }
}

/// Step A: establish the copy channel and start the destination's bulk
/// tablesync.
async fn step_a<C: Catalog>(task: &mut ActiveTask, catalog: &C, settings: &EngineSettings) -> StepOutcome {
    if task.src_session.ensure_open().await.is_err() {
        return StepOutcome::Retry;
    }
    if task.dst_session.ensure_open().await.is_err() {
        return StepOutcome::Retry;
    }

    match catalog_freshness_barrier(task, catalog, settings).await {
        Ok(FreshnessOutcome::Fresh) => {}
        Ok(FreshnessOutcome::NotReady) => return StepOutcome::Poll,
        Err(()) => return StepOutcome::Retry,
    }

    if task
        .dst_session
        .run_script(&task.drop_dest_subscription_script.clone())
        .await
        .is_err()
    {
        return StepOutcome::Retry;
    }
    if task
        .src_session
        .run_script(&task.create_publication_and_slot_script.clone())
        .await
        .is_err()
    {
        return StepOutcome::Retry;
    }
    if task
        .dst_session
        .run_script(&task.create_table_and_subscription_script.clone())
        .await
        .is_err()
    {
        return StepOutcome::Retry;
    }

    task.step = TaskStep::StartFinalsync;
    StepOutcome::Advance
}

enum FreshnessOutcome {
    Fresh,
    NotReady,
}

/// The metadata catalog is itself replicated to workers via logical
/// replication; a task acting on stale worker-side metadata can corrupt
/// the topology, so both sides must have caught up to the controller's
/// current commit position before any script touches them.
async fn catalog_freshness_barrier<C: Catalog>(
    task: &mut ActiveTask,
    catalog: &C,
    settings: &EngineSettings,
) -> Result<FreshnessOutcome, ()> {
    let commit_lsn = catalog.current_commit_lsn().await.map_err(|error| {
        tracing::warn!(task = %task.id, %error, "catalog unreachable during freshness barrier");
    })?;

    for session in [&mut task.src_session, &mut task.dst_session] {
        match query_meta_received_lsn(session.as_mut(), settings).await {
            Ok(Some(lsn)) if lsn >= commit_lsn => {}
            Ok(_) => return Ok(FreshnessOutcome::NotReady),
            Err(()) => return Err(()),
        }
    }
    Ok(FreshnessOutcome::Fresh)
}

async fn query_meta_received_lsn(
    session: &mut dyn shardlord_pg::SqlSession,
    settings: &EngineSettings,
) -> Result<Option<Lsn>, ()> {
    let sql = shardlord_catalog::scripts::query_meta_subscription_received_lsn(
        &settings.meta_subscription_name,
    );
    parse_optional_lsn(session.query_one(&sql).await)
}

/// Step B: wait for tablesync to finish, then mark the source read-only
/// and capture the sync point.
async fn step_b(task: &mut ActiveTask) -> StepOutcome {
    let sql = shardlord_catalog::scripts::query_subscription_relation_state(task.channel.as_str());
    match task.dst_session.query_one(&sql).await {
        Ok(state) if state == "r" => {}
        Ok(_) => return StepOutcome::Poll,
        Err(PgError::UnexpectedRowCount(0)) => return StepOutcome::Poll,
        Err(_) => return StepOutcome::Retry,
    }

    if task
        .src_session
        .run_script(&task.read_only_script.clone())
        .await
        .is_err()
    {
        return StepOutcome::Retry;
    }

    let sql = shardlord_catalog::scripts::query_current_wal_lsn();
    let lsn = match task.src_session.query_one(sql).await {
        Ok(text) => match text.parse::<Lsn>() {
            Ok(lsn) => lsn,
            Err(error) => {
                tracing::warn!(task = %task.id, %error, "unparseable wal lsn");
                return StepOutcome::Retry;
            }
        },
        Err(_) => return StepOutcome::Retry,
    };

    task.sync_point = Some(lsn);
    task.step = TaskStep::Finalize;
    StepOutcome::Advance
}

/// Step C: wait for the destination to replay up to the captured sync
/// point.
async fn step_c(task: &mut ActiveTask) -> StepOutcome {
    let sql = shardlord_catalog::scripts::query_received_lsn(task.channel.as_str());
    let received = match parse_optional_lsn(task.dst_session.query_one(&sql).await) {
        Ok(Some(lsn)) => lsn,
        Ok(None) => return StepOutcome::Poll,
        Err(()) => return StepOutcome::Retry,
    };

    let sync_point = task
        .sync_point
        .expect("sync_point is set in Step B before Step C ever runs");
    if received < sync_point {
        return StepOutcome::Poll;
    }

    task.step = TaskStep::Done;
    StepOutcome::Advance
}

/// NULL or not-yet-visible `received_lsn` both mean "not ready"; a
/// genuine transport failure is distinguished from either.
fn parse_optional_lsn(result: Result<String, PgError>) -> Result<Option<Lsn>, ()> {
    match result {
        Ok(text) if text.is_empty() => Ok(None),
        Ok(text) => match text.parse::<Lsn>() {
            Ok(lsn) => Ok(Some(lsn)),
            Err(_) => Ok(None),
        },
        Err(PgError::UnexpectedRowCount(0)) | Err(PgError::UnexpectedNull) => Ok(None),
        Err(_) => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardlord_catalog::InMemoryCatalog;
    use shardlord_pg::FakeSession;
    use shardlord_types::{ChannelName, NodeId, PartitionName, TaskId, TaskResult};

    use crate::task::{ActiveTask, Flavor, MoveExtension, MoveReconfigureStep};

    fn fresh_task(src: FakeSession, dst: FakeSession) -> ActiveTask {
        let partition = PartitionName::from("p");
        ActiveTask {
            id: TaskId::new(1),
            partition: partition.clone(),
            src: NodeId::new(1),
            dst: NodeId::new(2),
            kind: shardlord_types::TaskKind::MovePrimary,
            channel: ChannelName::copy(&partition, NodeId::new(1), NodeId::new(2)),
            relation: "r".to_string(),
            src_session: Box::new(src),
            dst_session: Box::new(dst),
            drop_dest_subscription_script: "DROP SUBSCRIPTION IF EXISTS x".to_string(),
            create_publication_and_slot_script: "SELECT 1".to_string(),
            create_table_and_subscription_script: "SELECT 1".to_string(),
            read_only_script: "SELECT 1".to_string(),
            step: TaskStep::StartTablesync,
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
        }
    }

    #[tokio::test(start_paused = true)]
    async fn step_a_advances_once_freshness_and_scripts_succeed() {
        let catalog = InMemoryCatalog::new();
        let src = FakeSession::new().push_query_ok("0/0");
        let dst = FakeSession::new().push_query_ok("0/0");
        let mut task = fresh_task(src, dst);
        let settings = EngineSettings::default();

        let signal = execute(&mut task, &catalog, &settings).await;
        assert_eq!(task.step, TaskStep::StartFinalsync);
        assert!(matches!(signal, ExecSignal::WakeMeUp(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn step_a_polls_when_meta_subscription_is_lagging() {
        let catalog = InMemoryCatalog::new().with_commit_lsn("0/100".parse().unwrap());
        let src = FakeSession::new().push_query_ok("0/0");
        let dst = FakeSession::new();
        let mut task = fresh_task(src, dst);
        let settings = EngineSettings::default();

        let before = clock::now();
        let signal = execute(&mut task, &catalog, &settings).await;
        assert_eq!(task.step, TaskStep::StartTablesync);
        match signal {
            ExecSignal::WakeMeUp(when) => {
                assert!(clock::diff_ms(when, before) >= settings.poll_interval_ms as i64)
            }
            _ => panic!("expected a poll wakeup"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn step_b_polls_until_tablesync_is_ready() {
        let dst = FakeSession::new().push_query_ok("d");
        let src = FakeSession::new();
        let mut task = fresh_task(src, dst);
        task.step = TaskStep::StartFinalsync;
        task.dst_session.ensure_open().await.unwrap();

        let outcome = step_b(&mut task).await;
        assert!(matches!(outcome, StepOutcome::Poll));
        assert_eq!(task.step, TaskStep::StartFinalsync);
    }

    #[tokio::test(start_paused = true)]
    async fn step_c_requires_received_lsn_past_sync_point() {
        let dst = FakeSession::new().push_query_ok("0/10");
        let src = FakeSession::new();
        let mut task = fresh_task(src, dst);
        task.step = TaskStep::Finalize;
        task.sync_point = Some("0/100".parse().unwrap());
        task.dst_session.ensure_open().await.unwrap();

        let outcome = step_c(&mut task).await;
        assert!(matches!(outcome, StepOutcome::Poll));
    }

    #[tokio::test(start_paused = true)]
    async fn step_c_advances_to_done_once_caught_up() {
        let dst = FakeSession::new().push_query_ok("0/200");
        let src = FakeSession::new();
        let mut task = fresh_task(src, dst);
        task.step = TaskStep::Finalize;
        task.sync_point = Some("0/100".parse().unwrap());
        task.dst_session.ensure_open().await.unwrap();

        let outcome = step_c(&mut task).await;
        assert!(matches!(outcome, StepOutcome::Advance));
        assert_eq!(task.step, TaskStep::Done);
    }
}
