//! Task construction: precondition validation against the catalog, and
//! precomputing every script a task will run.
//!
//! Construction is the *only* place `TaskError` is produced -- once a task
//! is `Active`, every remaining failure mode is locally recoverable. A
//! task never fails because of a transient remote error; it only fails
//! at construction or succeeds.

use async_trait::async_trait;
use shardlord_catalog::{scripts, Catalog};
use shardlord_pg::SessionFactory;
use shardlord_types::{ChannelName, NodeId, PartitionName, TaskId, TaskKind, TaskResult, TaskStep};

use crate::error::TaskError;
use crate::settings::EngineSettings;
use crate::task::{
    ActiveTask, CreateReplicaExtension, CreateReplicaReconfigureStep, Flavor, MoveExtension,
    MoveReconfigureStep, NeighborLink, Task,
};

/// Resolves a worker's libpq connection string. Implemented by the
/// caller (`shardlord-cli`) over its loaded `shardlord-config` node
/// registry -- kept as a trait here so the engine never depends on the
/// config crate directly.
#[async_trait]
pub trait ConnInfoResolver: Send + Sync {
    async fn conninfo(&self, node: NodeId) -> Result<String, TaskError>;
}

/// Build a move-partition task.
///
/// `src`/`dst` are given explicitly; `kind` is derived by comparing `src`
/// against the partition's current primary owner.
pub async fn build_move_task<C, F, R>(
    id: TaskId,
    catalog: &C,
    sessions: &F,
    conninfo: &R,
    settings: &EngineSettings,
    partition: PartitionName,
    src: NodeId,
    dst: NodeId,
) -> Task
where
    C: Catalog,
    F: SessionFactory,
    R: ConnInfoResolver,
{
    match try_build_move_task(catalog, sessions, conninfo, settings, &partition, src, dst).await {
        Ok(active) => Task::Active(Box::new(ActiveTask { id, ..*active })),
        Err(reason) => Task::failed(id, partition, src, dst, TaskKind::MovePrimary, reason),
    }
}

async fn try_build_move_task<C, F, R>(
    catalog: &C,
    sessions: &F,
    conninfo: &R,
    settings: &EngineSettings,
    partition: &PartitionName,
    src: NodeId,
    dst: NodeId,
) -> Result<Box<ActiveTask>, TaskError>
where
    C: Catalog,
    F: SessionFactory,
    R: ConnInfoResolver,
{
    validate_distinct_and_unoccupied(catalog, partition, src, dst).await?;

    let relation = catalog.relation_of(partition).await?;
    let primary = catalog.primary_owner(partition).await?;
    let kind = if primary == src {
        TaskKind::MovePrimary
    } else {
        TaskKind::MoveReplica
    };

    let prev_node = catalog.prev_neighbor(partition, src).await?;
    let next_node = catalog.next_neighbor(partition, src).await?;

    let src_conninfo = conninfo.conninfo(src).await?;
    let dst_conninfo = conninfo.conninfo(dst).await?;

    let channel = ChannelName::copy(partition, src, dst);

    let drop_dest_subscription_script = scripts::drop_subscription_cascade(channel.as_str());
    let create_publication_and_slot_script = [
        scripts::drop_publication_cascade(channel.as_str()),
        scripts::drop_replication_slot_if_exists(channel.as_str()),
        scripts::create_publication(channel.as_str(), &relation),
        scripts::create_replication_slot(channel.as_str()),
    ]
    .join("; ");
    let create_table_and_subscription_script = [
        scripts::create_table_like(&relation, &relation),
        scripts::create_subscription(channel.as_str(), &src_conninfo, channel.as_str(), channel.as_str()),
    ]
    .join("; ");
    let read_only_script = scripts::set_read_only(&relation);

    let mut prev_link = None;
    if let Some(prev) = prev_node {
        let prev_conninfo = conninfo.conninfo(prev).await?;
        let old_channel = ChannelName::data(partition, prev, src);
        let new_channel = ChannelName::data(partition, prev, dst);
        let reconfigure_script = [
            scripts::drop_publication_cascade(old_channel.as_str()),
            scripts::drop_replication_slot_if_exists(old_channel.as_str()),
            scripts::drop_publication_cascade(new_channel.as_str()),
            scripts::create_publication(new_channel.as_str(), &relation),
            scripts::create_replication_slot(new_channel.as_str()),
        ]
        .join("; ");
        prev_link = Some(NeighborLink {
            node: prev,
            session: sessions.open(&prev_conninfo),
            reconfigure_script,
        });
    }

    let mut next_link = None;
    if let Some(next) = next_node {
        let next_conninfo = conninfo.conninfo(next).await?;
        let old_channel = ChannelName::data(partition, src, next);
        let new_channel = ChannelName::data(partition, dst, next);
        let reconfigure_script = [
            scripts::drop_subscription_cascade(old_channel.as_str()),
            scripts::create_subscription(new_channel.as_str(), &dst_conninfo, new_channel.as_str(), new_channel.as_str()),
        ]
        .join("; ");
        next_link = Some(NeighborLink {
            node: next,
            session: sessions.open(&next_conninfo),
            reconfigure_script,
        });
    }

    let mut dst_reconfigure_fragments = Vec::new();
    if let Some(prev) = prev_node {
        let new_channel = ChannelName::data(partition, prev, dst);
        dst_reconfigure_fragments.push(scripts::drop_subscription_cascade(new_channel.as_str()));
        dst_reconfigure_fragments.push(scripts::create_subscription(
            new_channel.as_str(),
            &conninfo.conninfo(prev).await?,
            new_channel.as_str(),
            new_channel.as_str(),
        ));
    }
    if let Some(next) = next_node {
        let new_channel = ChannelName::data(partition, dst, next);
        dst_reconfigure_fragments.push(scripts::drop_publication_cascade(new_channel.as_str()));
        dst_reconfigure_fragments.push(scripts::drop_replication_slot_if_exists(new_channel.as_str()));
        dst_reconfigure_fragments.push(scripts::create_publication(new_channel.as_str(), &relation));
        dst_reconfigure_fragments.push(scripts::create_replication_slot(new_channel.as_str()));
    }
    let dst_reconfigure_script = dst_reconfigure_fragments.join("; ");

    let sync_standby_prev_script = prev_node
        .filter(|_| settings.sync_replicas)
        .map(|_| scripts::ensure_sync_standby(&dst.to_string()));
    let sync_standby_next_script = next_node
        .filter(|_| settings.sync_replicas)
        .map(|next| scripts::ensure_sync_standby(&next.to_string()));

    Ok(Box::new(ActiveTask {
        id: TaskId::new(0), // overwritten by the caller, see build_move_task
        partition: partition.clone(),
        src,
        dst,
        kind,
        channel,
        relation,
        src_session: sessions.open(&src_conninfo),
        dst_session: sessions.open(&dst_conninfo),
        drop_dest_subscription_script,
        create_publication_and_slot_script,
        create_table_and_subscription_script,
        read_only_script,
        step: TaskStep::StartTablesync,
        result: TaskResult::InProgress,
        sync_point: None,
        next_wake: Some(crate::clock::now()),
        readiness_token: None,
        flavor: Flavor::Move(MoveExtension {
            prev: prev_link,
            next: next_link,
            sync_standby_prev_script,
            sync_standby_next_script,
            dst_reconfigure_script,
            reconfigure_step: MoveReconfigureStep::RedirectPrev,
        }),
    }))
}

/// Build a create-replica task: a new replica at the tail of
/// `partition`'s chain. The source is resolved to the current tail
/// owner, never taken as a parameter.
pub async fn build_create_replica_task<C, F, R>(
    id: TaskId,
    catalog: &C,
    sessions: &F,
    conninfo: &R,
    settings: &EngineSettings,
    partition: PartitionName,
    dst: NodeId,
) -> Task
where
    C: Catalog,
    F: SessionFactory,
    R: ConnInfoResolver,
{
    match try_build_create_replica_task(catalog, sessions, conninfo, settings, &partition, dst).await
    {
        Ok((src, active)) => Task::Active(Box::new(ActiveTask { id, ..*active })),
        Err((src, reason)) => Task::failed(id, partition, src, dst, TaskKind::CreateReplica, reason),
    }
}

async fn try_build_create_replica_task<C, F, R>(
    catalog: &C,
    sessions: &F,
    conninfo: &R,
    settings: &EngineSettings,
    partition: &PartitionName,
    dst: NodeId,
) -> Result<(NodeId, Box<ActiveTask>), (NodeId, TaskError)>
where
    C: Catalog,
    F: SessionFactory,
    R: ConnInfoResolver,
{
    let src = match catalog.tail_owner(partition).await {
        Ok(src) => src,
        // No chain exists yet to report a meaningful `src` against; use
        // `dst` as a stand-in so the caller still gets a `Task::Failed`.
        Err(e) => return Err((dst, TaskError::Catalog(e))),
    };

    if let Err(e) = validate_distinct_and_unoccupied(catalog, partition, src, dst).await {
        return Err((src, e));
    }

    let relation = match catalog.relation_of(partition).await {
        Ok(r) => r,
        Err(e) => return Err((src, TaskError::Catalog(e))),
    };

    let src_conninfo = match conninfo.conninfo(src).await {
        Ok(c) => c,
        Err(e) => return Err((src, e)),
    };
    let dst_conninfo = match conninfo.conninfo(dst).await {
        Ok(c) => c,
        Err(e) => return Err((src, e)),
    };

    let copy_channel = ChannelName::copy(partition, src, dst);
    let data_channel = ChannelName::data(partition, src, dst);

    let drop_dest_subscription_script = scripts::drop_subscription_cascade(copy_channel.as_str());
    let create_publication_and_slot_script = [
        scripts::drop_publication_cascade(copy_channel.as_str()),
        scripts::drop_replication_slot_if_exists(copy_channel.as_str()),
        scripts::create_publication(copy_channel.as_str(), &relation),
        scripts::create_replication_slot(copy_channel.as_str()),
    ]
    .join("; ");
    let create_table_and_subscription_script = [
        scripts::create_table_like(&relation, &relation),
        scripts::create_subscription(
            copy_channel.as_str(),
            &src_conninfo,
            copy_channel.as_str(),
            copy_channel.as_str(),
        ),
    ]
    .join("; ");
    let read_only_script = scripts::set_read_only(&relation);

    let drop_copy_subscription_script = scripts::drop_subscription_cascade(copy_channel.as_str());
    let create_data_publication_and_slot_script = [
        scripts::drop_publication_cascade(data_channel.as_str()),
        scripts::drop_replication_slot_if_exists(data_channel.as_str()),
        scripts::create_publication(data_channel.as_str(), &relation),
        scripts::create_replication_slot(data_channel.as_str()),
    ]
    .join("; ");
    let create_data_subscription_script = [
        scripts::drop_subscription_cascade(data_channel.as_str()),
        scripts::create_subscription(
            data_channel.as_str(),
            &src_conninfo,
            data_channel.as_str(),
            data_channel.as_str(),
        ),
    ]
    .join("; ");
    let sync_standby_script = Some(scripts::ensure_sync_standby(&dst.to_string()));
    let release_read_only_script = scripts::release_read_only(&relation);

    Ok((
        src,
        Box::new(ActiveTask {
            id: TaskId::new(0),
            partition: partition.clone(),
            src,
            dst,
            kind: TaskKind::CreateReplica,
            channel: copy_channel,
            relation,
            src_session: sessions.open(&src_conninfo),
            dst_session: sessions.open(&dst_conninfo),
            drop_dest_subscription_script,
            create_publication_and_slot_script,
            create_table_and_subscription_script,
            read_only_script,
            step: TaskStep::StartTablesync,
            result: TaskResult::InProgress,
            sync_point: None,
            next_wake: Some(crate::clock::now()),
            readiness_token: None,
            flavor: Flavor::CreateReplica(CreateReplicaExtension {
                drop_copy_subscription_script,
                create_data_publication_and_slot_script,
                create_data_subscription_script,
                sync_standby_script: sync_standby_script.filter(|_| settings.sync_replicas),
                release_read_only_script,
                reconfigure_step: CreateReplicaReconfigureStep::DropCopySubscription,
            }),
        }),
    ))
}

async fn validate_distinct_and_unoccupied<C: Catalog>(
    catalog: &C,
    partition: &PartitionName,
    src: NodeId,
    dst: NodeId,
) -> Result<(), TaskError> {
    if src == dst {
        return Err(TaskError::SourceEqualsDestination(src));
    }
    if !catalog.partition_exists_on(partition, src).await? {
        return Err(TaskError::SourceDoesNotHoldPartition(partition.clone(), src));
    }
    if catalog.partition_exists_on(partition, dst).await? {
        return Err(TaskError::DestinationAlreadyHoldsPartition(
            partition.clone(),
            dst,
        ));
    }
    Ok(())
}
