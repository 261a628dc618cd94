//! A [`Catalog`] backed by a live connection to the shardlord's own
//! metadata database.
//!
//! This is the production implementation the CLI wires up against a real
//! cluster; [`crate::InMemoryCatalog`] remains the one the engine's own
//! tests run against, never a live PostgreSQL instance. `PgCatalog`
//! issues SQL over [`shardlord_pg::SqlSession`] the same way the engine
//! itself talks to workers -- the catalog database is just another
//! Postgres connection from this crate's point of view, distinguished
//! only by which table it queries.
//!
//! The `partitions` table is exactly [`crate::PARTITIONS_DDL`]. A second,
//! single-row table carries the one piece of cluster-wide state this
//! trait exposes that isn't part of the replica-chain shape:
//!
//! ```sql
//! CREATE TABLE shardlord_settings (
//!     sync_replicas_enabled BOOLEAN NOT NULL DEFAULT false
//! );
//! ```
//!
//! `current_commit_lsn` needs no table of its own: the catalog connection
//! *is* a connection to the shardlord's own node, so its current commit
//! position is just `pg_current_wal_lsn()` run on that same connection.

use async_trait::async_trait;
use shardlord_pg::SqlSession;
use shardlord_types::{Lsn, NodeId, PartitionName};
use tokio::sync::Mutex;

use crate::{Catalog, CatalogError};

/// Wraps a single [`SqlSession`] behind a mutex so `&self` methods (the
/// shape [`Catalog`] requires) can still drive a stateful, `&mut self`
/// connection.
pub struct PgCatalog {
    session: Mutex<Box<dyn SqlSession>>,
}

impl PgCatalog {
    pub fn new(session: Box<dyn SqlSession>) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    async fn query_one(&self, sql: &str) -> Result<String, CatalogError> {
        let mut session = self.session.lock().await;
        session
            .ensure_open()
            .await
            .map_err(|error| CatalogError::Backend(error.to_string()))?;
        session
            .query_one(sql)
            .await
            .map_err(|error| CatalogError::Backend(error.to_string()))
    }

    async fn run_script(&self, script: &str) -> Result<(), CatalogError> {
        let mut session = self.session.lock().await;
        session
            .ensure_open()
            .await
            .map_err(|error| CatalogError::Backend(error.to_string()))?;
        session
            .run_script(script)
            .await
            .map_err(|error| CatalogError::Backend(error.to_string()))
    }

    async fn chain_row(
        &self,
        part: &PartitionName,
        column: &str,
        condition: &str,
    ) -> Result<String, CatalogError> {
        let sql = format!(
            "SELECT {column} FROM partitions WHERE part_name = {part} AND {condition}",
            part = quote(part.as_str()),
        );
        self.query_one(&sql)
            .await
            .map_err(|_| CatalogError::PartitionNotFound(part.clone()))
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn primary_owner(&self, part: &PartitionName) -> Result<NodeId, CatalogError> {
        let owner = self.chain_row(part, "owner", "prv IS NULL").await?;
        parse_node(&owner)
    }

    async fn tail_owner(&self, part: &PartitionName) -> Result<NodeId, CatalogError> {
        let owner = self.chain_row(part, "owner", "nxt IS NULL").await?;
        parse_node(&owner)
    }

    async fn next_neighbor(
        &self,
        part: &PartitionName,
        node: NodeId,
    ) -> Result<Option<NodeId>, CatalogError> {
        let sql = format!(
            "SELECT nxt FROM partitions WHERE part_name = {part} AND owner = {node}",
            part = quote(part.as_str()),
            node = node.get(),
        );
        match self.query_one(&sql).await {
            Ok(text) if text.is_empty() => Ok(None),
            Ok(text) => Ok(Some(parse_node(&text)?)),
            Err(_) => Err(CatalogError::NodeNotInChain(part.clone(), node)),
        }
    }

    async fn prev_neighbor(
        &self,
        part: &PartitionName,
        node: NodeId,
    ) -> Result<Option<NodeId>, CatalogError> {
        let sql = format!(
            "SELECT prv FROM partitions WHERE part_name = {part} AND owner = {node}",
            part = quote(part.as_str()),
            node = node.get(),
        );
        match self.query_one(&sql).await {
            Ok(text) if text.is_empty() => Ok(None),
            Ok(text) => Ok(Some(parse_node(&text)?)),
            Err(_) => Err(CatalogError::NodeNotInChain(part.clone(), node)),
        }
    }

    async fn relation_of(&self, part: &PartitionName) -> Result<String, CatalogError> {
        let sql = format!(
            "SELECT relation FROM partitions WHERE part_name = {part} LIMIT 1",
            part = quote(part.as_str()),
        );
        self.query_one(&sql)
            .await
            .map_err(|_| CatalogError::PartitionNotFound(part.clone()))
    }

    async fn partition_exists_on(
        &self,
        part: &PartitionName,
        node: NodeId,
    ) -> Result<bool, CatalogError> {
        let sql = format!(
            "SELECT count(*) FROM partitions WHERE part_name = {part} AND owner = {node}",
            part = quote(part.as_str()),
            node = node.get(),
        );
        let count = self.query_one(&sql).await?;
        Ok(count.trim() != "0")
    }

    async fn sync_replicas_enabled(&self) -> Result<bool, CatalogError> {
        let text = self
            .query_one("SELECT sync_replicas_enabled FROM shardlord_settings")
            .await?;
        Ok(text == "t" || text.eq_ignore_ascii_case("true"))
    }

    async fn current_commit_lsn(&self) -> Result<Lsn, CatalogError> {
        let text = self.query_one("SELECT pg_current_wal_lsn()").await?;
        text.parse()
            .map_err(|error: shardlord_types::LsnParseError| CatalogError::Backend(error.to_string()))
    }

    async fn apply_move(
        &self,
        part: &PartitionName,
        src: NodeId,
        dst: NodeId,
    ) -> Result<(), CatalogError> {
        let part = quote(part.as_str());
        let script = format!(
            "UPDATE partitions SET owner = {dst} WHERE part_name = {part} AND owner = {src}; \
             UPDATE partitions SET prv = {dst} WHERE part_name = {part} AND prv = {src}; \
             UPDATE partitions SET nxt = {dst} WHERE part_name = {part} AND nxt = {src}",
            dst = dst.get(),
            src = src.get(),
        );
        self.run_script(&script).await
    }

    async fn apply_create_replica(
        &self,
        part: &PartitionName,
        old_tail: NodeId,
        new_node: NodeId,
        relation: &str,
    ) -> Result<(), CatalogError> {
        let part = quote(part.as_str());
        let script = format!(
            "UPDATE partitions SET nxt = {new_node} WHERE part_name = {part} AND owner = {old_tail}; \
             INSERT INTO partitions (part_name, owner, prv, nxt, relation) \
             VALUES ({part}, {new_node}, {old_tail}, NULL, {relation})",
            new_node = new_node.get(),
            old_tail = old_tail.get(),
            relation = quote(relation),
        );
        self.run_script(&script).await
    }

    async fn set_replication_level(&self, replicas: u32) -> Result<(), CatalogError> {
        let enabled = if replicas > 0 { "true" } else { "false" };
        let script = format!("UPDATE shardlord_settings SET sync_replicas_enabled = {enabled}");
        self.run_script(&script).await
    }
}

fn parse_node(text: &str) -> Result<NodeId, CatalogError> {
    text.trim()
        .parse::<i32>()
        .map(NodeId::new)
        .map_err(|error| CatalogError::Backend(format!("unparseable node id {text:?}: {error}")))
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardlord_pg::FakeSession;
    use shardlord_types::PartitionName;

    #[tokio::test]
    async fn primary_owner_parses_the_single_column_result() {
        let session = FakeSession::new().push_query_ok("3");
        let catalog = PgCatalog::new(Box::new(session));
        let owner = catalog.primary_owner(&PartitionName::from("orders_1")).await.unwrap();
        assert_eq!(owner, NodeId::new(3));
    }

    #[tokio::test]
    async fn partition_exists_on_treats_nonzero_count_as_present() {
        let session = FakeSession::new().push_query_ok("1");
        let catalog = PgCatalog::new(Box::new(session));
        let exists = catalog
            .partition_exists_on(&PartitionName::from("orders_1"), NodeId::new(2))
            .await
            .unwrap();
        assert!(exists);
    }

    #[tokio::test]
    async fn sync_replicas_enabled_parses_postgres_boolean_text() {
        let session = FakeSession::new().push_query_ok("t");
        let catalog = PgCatalog::new(Box::new(session));
        assert!(catalog.sync_replicas_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn current_commit_lsn_parses_the_wal_position() {
        let session = FakeSession::new().push_query_ok("0/16B3748");
        let catalog = PgCatalog::new(Box::new(session));
        let lsn = catalog.current_commit_lsn().await.unwrap();
        assert_eq!(lsn, "0/16B3748".parse().unwrap());
    }
}
