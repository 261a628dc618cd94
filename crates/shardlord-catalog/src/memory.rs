//! An in-memory [`Catalog`] double for tests -- never used against a live
//! cluster. A plain data structure behind the trait, with no network or
//! disk I/O, so copy-engine tests can assert on exact catalog state after
//! a task completes.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use shardlord_types::{Lsn, NodeId, PartitionName};

use crate::{Catalog, CatalogError};

#[derive(Debug, Clone)]
struct ChainRow {
    owner: NodeId,
    prv: Option<NodeId>,
    nxt: Option<NodeId>,
    relation: String,
}

/// An in-memory replica-chain catalog, keyed by partition name.
///
/// Each partition maps to a `Vec<ChainRow>` in chain order (head first);
/// this is purely a test convenience -- the real catalog's rows have no
/// inherent order, only the `prv`/`nxt` pointers do.
pub struct InMemoryCatalog {
    chains: Mutex<BTreeMap<PartitionName, Vec<ChainRow>>>,
    sync_replicas: Mutex<bool>,
    commit_lsn: Mutex<Lsn>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            chains: Mutex::new(BTreeMap::new()),
            sync_replicas: Mutex::new(false),
            commit_lsn: Mutex::new(Lsn::ZERO),
        }
    }

    pub fn with_sync_replicas(self, enabled: bool) -> Self {
        *self.sync_replicas.lock().unwrap() = enabled;
        self
    }

    pub fn with_commit_lsn(self, lsn: Lsn) -> Self {
        *self.commit_lsn.lock().unwrap() = lsn;
        self
    }

    /// Seed a single-node chain: `(part, owner, relation)` with no
    /// neighbors.
    pub fn seed_primary(&self, part: &PartitionName, owner: NodeId, relation: &str) {
        self.chains.lock().unwrap().insert(
            part.clone(),
            vec![ChainRow {
                owner,
                prv: None,
                nxt: None,
                relation: relation.to_string(),
            }],
        );
    }

    /// Seed an arbitrary chain in head-to-tail order.
    pub fn seed_chain(&self, part: &PartitionName, relation: &str, owners: &[NodeId]) {
        let mut rows = Vec::with_capacity(owners.len());
        for (i, &owner) in owners.iter().enumerate() {
            rows.push(ChainRow {
                owner,
                prv: if i == 0 { None } else { Some(owners[i - 1]) },
                nxt: owners.get(i + 1).copied(),
                relation: relation.to_string(),
            });
        }
        self.chains.lock().unwrap().insert(part.clone(), rows);
    }

    /// Snapshot of `(owner, prv, nxt)` triples for assertions, in chain
    /// order.
    pub fn chain_snapshot(&self, part: &PartitionName) -> Vec<(NodeId, Option<NodeId>, Option<NodeId>)> {
        self.chains
            .lock()
            .unwrap()
            .get(part)
            .map(|rows| rows.iter().map(|r| (r.owner, r.prv, r.nxt)).collect())
            .unwrap_or_default()
    }

    fn rows(&self, part: &PartitionName) -> Result<Vec<ChainRow>, CatalogError> {
        self.chains
            .lock()
            .unwrap()
            .get(part)
            .cloned()
            .ok_or_else(|| CatalogError::PartitionNotFound(part.clone()))
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn primary_owner(&self, part: &PartitionName) -> Result<NodeId, CatalogError> {
        self.rows(part)?
            .into_iter()
            .find(|r| r.prv.is_none())
            .map(|r| r.owner)
            .ok_or_else(|| CatalogError::PartitionNotFound(part.clone()))
    }

    async fn tail_owner(&self, part: &PartitionName) -> Result<NodeId, CatalogError> {
        self.rows(part)?
            .into_iter()
            .find(|r| r.nxt.is_none())
            .map(|r| r.owner)
            .ok_or_else(|| CatalogError::PartitionNotFound(part.clone()))
    }

    async fn next_neighbor(
        &self,
        part: &PartitionName,
        node: NodeId,
    ) -> Result<Option<NodeId>, CatalogError> {
        let rows = self.rows(part)?;
        let row = rows
            .iter()
            .find(|r| r.owner == node)
            .ok_or_else(|| CatalogError::NodeNotInChain(part.clone(), node))?;
        Ok(row.nxt)
    }

    async fn prev_neighbor(
        &self,
        part: &PartitionName,
        node: NodeId,
    ) -> Result<Option<NodeId>, CatalogError> {
        let rows = self.rows(part)?;
        let row = rows
            .iter()
            .find(|r| r.owner == node)
            .ok_or_else(|| CatalogError::NodeNotInChain(part.clone(), node))?;
        Ok(row.prv)
    }

    async fn relation_of(&self, part: &PartitionName) -> Result<String, CatalogError> {
        self.rows(part)?
            .first()
            .map(|r| r.relation.clone())
            .ok_or_else(|| CatalogError::PartitionNotFound(part.clone()))
    }

    async fn partition_exists_on(
        &self,
        part: &PartitionName,
        node: NodeId,
    ) -> Result<bool, CatalogError> {
        Ok(self
            .chains
            .lock()
            .unwrap()
            .get(part)
            .is_some_and(|rows| rows.iter().any(|r| r.owner == node)))
    }

    async fn sync_replicas_enabled(&self) -> Result<bool, CatalogError> {
        Ok(*self.sync_replicas.lock().unwrap())
    }

    async fn current_commit_lsn(&self) -> Result<Lsn, CatalogError> {
        Ok(*self.commit_lsn.lock().unwrap())
    }

    async fn apply_move(
        &self,
        part: &PartitionName,
        src: NodeId,
        dst: NodeId,
    ) -> Result<(), CatalogError> {
        let mut chains = self.chains.lock().unwrap();
        let rows = chains
            .get_mut(part)
            .ok_or_else(|| CatalogError::PartitionNotFound(part.clone()))?;
        for row in rows.iter_mut() {
            if row.owner == src {
                row.owner = dst;
            }
            if row.prv == Some(src) {
                row.prv = Some(dst);
            }
            if row.nxt == Some(src) {
                row.nxt = Some(dst);
            }
        }
        Ok(())
    }

    async fn apply_create_replica(
        &self,
        part: &PartitionName,
        old_tail: NodeId,
        new_node: NodeId,
        relation: &str,
    ) -> Result<(), CatalogError> {
        let mut chains = self.chains.lock().unwrap();
        let rows = chains
            .get_mut(part)
            .ok_or_else(|| CatalogError::PartitionNotFound(part.clone()))?;
        if rows.iter().any(|r| r.owner == new_node) {
            return Err(CatalogError::DuplicateChainMember(part.clone(), new_node));
        }
        for row in rows.iter_mut() {
            if row.owner == old_tail {
                row.nxt = Some(new_node);
            }
        }
        rows.push(ChainRow {
            owner: new_node,
            prv: Some(old_tail),
            nxt: None,
            relation: relation.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn move_primary_rewrites_owner() {
        let part = PartitionName::from("p");
        let cat = InMemoryCatalog::new();
        cat.seed_primary(&part, NodeId::new(1), "r");

        cat.apply_move(&part, NodeId::new(1), NodeId::new(2))
            .await
            .unwrap();

        assert_eq!(
            cat.chain_snapshot(&part),
            vec![(NodeId::new(2), None, None)]
        );
    }

    #[tokio::test]
    async fn move_primary_with_downstream_rewrites_both_rows() {
        let part = PartitionName::from("p");
        let cat = InMemoryCatalog::new();
        cat.seed_chain(&part, "r", &[NodeId::new(1), NodeId::new(3)]);

        cat.apply_move(&part, NodeId::new(1), NodeId::new(2))
            .await
            .unwrap();

        assert_eq!(
            cat.chain_snapshot(&part),
            vec![
                (NodeId::new(2), None, Some(NodeId::new(3))),
                (NodeId::new(3), Some(NodeId::new(2)), None)
            ]
        );
    }

    #[tokio::test]
    async fn create_replica_appends_tail() {
        let part = PartitionName::from("p");
        let cat = InMemoryCatalog::new();
        cat.seed_primary(&part, NodeId::new(1), "r");

        cat.apply_create_replica(&part, NodeId::new(1), NodeId::new(2), "r")
            .await
            .unwrap();

        assert_eq!(
            cat.chain_snapshot(&part),
            vec![
                (NodeId::new(1), None, Some(NodeId::new(2))),
                (NodeId::new(2), Some(NodeId::new(1)), None)
            ]
        );
    }

    #[tokio::test]
    async fn destination_already_in_chain_is_rejected() {
        let part = PartitionName::from("p");
        let cat = InMemoryCatalog::new();
        cat.seed_chain(&part, "r", &[NodeId::new(1), NodeId::new(2)]);

        let exists = cat
            .partition_exists_on(&part, NodeId::new(2))
            .await
            .unwrap();
        assert!(exists);
    }
}
