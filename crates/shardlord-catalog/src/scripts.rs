//! Script templates the engine issues against worker connections.
//!
//! Every builder here returns a single semicolon-separated `String` meant
//! to be run through `shardlord-pg`'s naive splitter: fragments never
//! contain embedded semicolons, by construction -- none of the builders
//! below ever interpolate raw user text that could contain one, only
//! identifiers the catalog itself validated (partition/relation/node
//! names).
//!
//! Deterministic channel and subscription names come from
//! `shardlord_types::ChannelName`; this module only builds the SQL bodies.

use shardlord_types::ChannelName;

/// `CREATE TABLE partitions (...)` contract -- re-exported here so callers
/// building scripts and callers reading the schema doc live in one place.
pub use crate::PARTITIONS_DDL;

/// Drop a subscription if it exists, cascading into its slot on the far
/// side if the subscription is still enabled.
pub fn drop_subscription_cascade(sub_name: &str) -> String {
    format!("DROP SUBSCRIPTION IF EXISTS {sub_name}")
}

/// Drop a publication if it exists, cascading to any subscriptions that
/// still reference it.
pub fn drop_publication_cascade(pub_name: &str) -> String {
    format!("DROP PUBLICATION IF EXISTS {pub_name}")
}

/// Create a publication scoped to a single partition's relation.
pub fn create_publication(pub_name: &str, relation: &str) -> String {
    format!("CREATE PUBLICATION {pub_name} FOR TABLE {relation}")
}

/// Drop a replication slot if it exists (source side, before recreating).
pub fn drop_replication_slot_if_exists(slot_name: &str) -> String {
    format!(
        "SELECT pg_drop_replication_slot({slot_name}) \
         WHERE EXISTS (SELECT 1 FROM pg_replication_slots WHERE slot_name = {slot_name})",
        slot_name = quote_literal(slot_name)
    )
}

/// Create a logical replication slot with output plugin `pgoutput`.
pub fn create_replication_slot(slot_name: &str) -> String {
    format!("SELECT pg_create_logical_replication_slot({}, 'pgoutput')", quote_literal(slot_name))
}

/// Create a subscription against an existing slot, with
/// `create_slot = false` and local synchronous commit: the moment
/// bulk-copy actually starts.
pub fn create_subscription(sub_name: &str, conninfo: &str, pub_name: &str, slot_name: &str) -> String {
    format!(
        "CREATE SUBSCRIPTION {sub_name} CONNECTION {conninfo} PUBLICATION {pub_name} \
         WITH (create_slot = false, slot_name = {slot_name}, synchronous_commit = local)",
        conninfo = quote_literal(conninfo),
        slot_name = quote_literal(slot_name),
    )
}

/// Create the destination table shaped like the partition's root
/// relation, including defaults, indexes and storage -- but not foreign
/// keys, a known limitation.
pub fn create_table_like(dest_table: &str, root_relation: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {dest_table}; \
         CREATE TABLE {dest_table} (LIKE {root_relation} INCLUDING DEFAULTS INCLUDING INDEXES INCLUDING STORAGE)"
    )
}

/// Drop write privileges on the source partition at the relation level;
/// reads remain allowed, the known stale-read-window compromise.
pub fn set_read_only(relation: &str) -> String {
    format!("REVOKE INSERT, UPDATE, DELETE ON {relation} FROM PUBLIC")
}

/// Release the read-only restriction after reconfiguration. Symmetric
/// with [`set_read_only`]: re-grants to `PUBLIC` what that revoked.
pub fn release_read_only(relation: &str) -> String {
    format!("GRANT INSERT, UPDATE, DELETE ON {relation} TO PUBLIC")
}

/// Query the source's current WAL insertion position.
pub fn query_current_wal_lsn() -> &'static str {
    "SELECT pg_current_wal_lsn()"
}

/// Query a subscription's `received_lsn` by name. A NULL `received_lsn`
/// must be treated by the caller as not-ready.
pub fn query_received_lsn(sub_name: &str) -> String {
    format!(
        "SELECT received_lsn FROM pg_stat_subscription WHERE subname = {}",
        quote_literal(sub_name)
    )
}

/// Query a subscription's tablesync state for its one relation. Zero
/// rows means "not yet visible"; the caller treats that as not-ready
/// too.
pub fn query_subscription_relation_state(sub_name: &str) -> String {
    format!(
        "SELECT pg_subscription_rel.srsubstate FROM pg_subscription_rel \
         JOIN pg_subscription ON pg_subscription.oid = pg_subscription_rel.srsubid \
         WHERE pg_subscription.subname = {}",
        quote_literal(sub_name)
    )
}

/// The well-known meta-subscription's `received_lsn`, used by the
/// catalog-freshness barrier.
pub fn query_meta_subscription_received_lsn(meta_sub_name: &str) -> String {
    query_received_lsn(meta_sub_name)
}

/// Enroll `standby_application_name` as a synchronous standby on the node
/// the script runs against. Realized as the `ALTER SYSTEM` +
/// `pg_reload_conf()` idiom for `synchronous_standby_names`.
pub fn ensure_sync_standby(standby_application_name: &str) -> String {
    format!(
        "ALTER SYSTEM SET synchronous_standby_names = {}; SELECT pg_reload_conf()",
        quote_literal(standby_application_name)
    )
}

/// The copy channel's publication + slot name on the source, and its
/// subscription name on the destination, are the same string: a
/// deterministic function of partition, source, and destination.
pub fn copy_channel_name(part: &shardlord_types::PartitionName, src: shardlord_types::NodeId, dst: shardlord_types::NodeId) -> ChannelName {
    ChannelName::copy(part, src, dst)
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardlord_types::{NodeId, PartitionName};

    #[test]
    fn scripts_never_embed_semicolons_in_a_fragment() {
        let script = create_subscription(
            "shardman_copy_p_1_2",
            "host=db2",
            "shardman_copy_p_1_2",
            "shardman_copy_p_1_2",
        );
        assert!(!script.contains(';'));
    }

    #[test]
    fn copy_channel_matches_spec_naming() {
        let name = copy_channel_name(&PartitionName::from("orders_1"), NodeId::new(1), NodeId::new(2));
        assert_eq!(name.as_str(), "shardman_copy_orders_1_1_2");
    }

    #[test]
    fn quote_literal_escapes_single_quotes() {
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }
}
