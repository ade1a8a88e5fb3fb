//! Neighbour table operations.
//!
//! `NeighbourTable` wraps a `HashMap<Uuid, NeighbourNode>` with
//! validating upsert/delete methods and the freshness predicates that
//! gate every incoming event. There's no distance metric to bucket by
//! here, so neighbours are filtered by status set rather than by
//! XOR-bucket placement.

use std::collections::HashMap;
use std::time::Instant;

use swim_proto::event::{Access, NodeStatus};
use uuid::Uuid;

use crate::{CoreError, Result};

/// A peer as seen by this node.
#[derive(Clone, Debug)]
pub struct NeighbourNode {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    pub access: Access,
    pub restart_counter: u64,
    /// Highest observed `tx` per event code.
    pub events_tx: HashMap<u8, u64>,
    pub payload: Vec<u8>,
    pub updated_at: Instant,
}

impl NeighbourNode {
    pub fn new(id: Uuid, host: String, port: u16, status: NodeStatus, access: Access) -> Self {
        Self {
            id,
            host,
            port,
            status,
            access,
            restart_counter: 0,
            events_tx: HashMap::new(),
            payload: Vec::new(),
            updated_at: Instant::now(),
        }
    }

    /// True iff `restart_counter` is a strictly newer incarnation than
    /// what's stored (freshness comparison, restart half).
    pub fn suitable_restart_counter(&self, restart_counter: u64) -> bool {
        restart_counter > self.restart_counter
    }

    /// True iff `tx` is a strictly newer observation for `code` than
    /// what's stored (freshness comparison, tx half; `events_tx` is
    /// tracked per event code).
    pub fn suitable_tx(&self, code: u8, tx: u64) -> bool {
        match self.events_tx.get(&code) {
            Some(&existing) => tx > existing,
            None => true,
        }
    }

    /// True iff `(restart_counter, tx)` is strictly newer than the
    /// stored incarnation for event code `code`: `restart_counter` is
    /// strictly greater, OR equal and `tx` is strictly greater.
    pub fn suitable_incarnation(&self, restart_counter: u64, code: u8, tx: u64) -> bool {
        self.suitable_restart_counter(restart_counter)
            || (restart_counter == self.restart_counter && self.suitable_tx(code, tx))
    }
}

/// Outcome of an upsert attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A brand new neighbour was inserted.
    Inserted,
    /// An existing neighbour was refreshed in place.
    Updated,
    /// The upsert was a no-op: the neighbour would have been the local
    /// node itself. Never a hard error — a node hearing about itself
    /// from a gossip message is routine, not exceptional.
    IgnoredSelf,
}

/// The neighbour table: `id -> NeighbourNode`, unique by id.
#[derive(Default)]
pub struct NeighbourTable {
    neighbours: HashMap<Uuid, NeighbourNode>,
}

impl NeighbourTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.neighbours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbours.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<&NeighbourNode> {
        self.neighbours.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut NeighbourNode> {
        self.neighbours.get_mut(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.neighbours.contains_key(id)
    }

    /// Insert or refresh a neighbour.
    ///
    /// Refuses (as a quiet no-op) if `neighbour.id ==
    /// self_id`. Refuses with [`CoreError::ClusterSizeExceeded`] when
    /// the neighbour is new and `1 + len() >= cluster_size`. Always
    /// refreshes `updated_at` on success.
    pub fn upsert(
        &mut self,
        self_id: Uuid,
        cluster_size: u32,
        mut neighbour: NeighbourNode,
    ) -> Result<UpsertOutcome> {
        if neighbour.id == self_id {
            return Ok(UpsertOutcome::IgnoredSelf);
        }

        let is_new = !self.neighbours.contains_key(&neighbour.id);
        if is_new {
            let nodes_in_cluster = u32::try_from(self.neighbours.len()).unwrap_or(u32::MAX) + 1;
            if nodes_in_cluster >= cluster_size {
                return Err(CoreError::ClusterSizeExceeded {
                    nodes_in_cluster: nodes_in_cluster + 1,
                    cluster_size,
                });
            }
        }

        neighbour.updated_at = Instant::now();
        self.neighbours.insert(neighbour.id, neighbour);
        Ok(if is_new {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    pub fn delete(&mut self, id: &Uuid) -> Option<NeighbourNode> {
        self.neighbours.remove(id)
    }

    pub fn delete_all(&mut self) {
        self.neighbours.clear();
    }

    /// Neighbours whose status is in `statuses`.
    pub fn filter_by_status(&self, statuses: &[NodeStatus]) -> Vec<&NeighbourNode> {
        self.neighbours
            .values()
            .filter(|n| statuses.contains(&n.status))
            .collect()
    }

    /// The least-recently-updated neighbour among those whose status is
    /// in `statuses`.
    pub fn get_oldest_by_updated_at(&self, statuses: &[NodeStatus]) -> Option<&NeighbourNode> {
        self.filter_by_status(statuses)
            .into_iter()
            .min_by_key(|n| n.updated_at)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.neighbours.keys().copied().collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &NeighbourNode> {
        self.neighbours.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    fn node(n: u8, status: NodeStatus) -> NeighbourNode {
        NeighbourNode::new(uid(n), "127.0.0.1".into(), 5376, status, Access::Direct)
    }

    #[test]
    fn test_upsert_insert_then_update() {
        let mut table = NeighbourTable::new();
        let outcome = table
            .upsert(uid(0), 10, node(1, NodeStatus::Alive))
            .expect("upsert");
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(table.len(), 1);

        let outcome = table
            .upsert(uid(0), 10, node(1, NodeStatus::Suspect))
            .expect("upsert");
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&uid(1)).expect("present").status, NodeStatus::Suspect);
    }

    #[test]
    fn test_upsert_refuses_self() {
        let mut table = NeighbourTable::new();
        let outcome = table
            .upsert(uid(1), 10, node(1, NodeStatus::Alive))
            .expect("upsert");
        assert_eq!(outcome, UpsertOutcome::IgnoredSelf);
        assert!(table.is_empty());
    }

    #[test]
    fn test_upsert_refuses_cluster_size_exceeded() {
        let mut table = NeighbourTable::new();
        table
            .upsert(uid(0), 2, node(1, NodeStatus::Alive))
            .expect("first insert fits 1+1<=2... actually boundary");
        let result = table.upsert(uid(0), 2, node(2, NodeStatus::Alive));
        assert!(matches!(result, Err(CoreError::ClusterSizeExceeded { .. })));
    }

    #[test]
    fn test_delete_and_delete_all() {
        let mut table = NeighbourTable::new();
        table.upsert(uid(0), 10, node(1, NodeStatus::Alive)).expect("upsert");
        table.upsert(uid(0), 10, node(2, NodeStatus::Alive)).expect("upsert");
        assert!(table.delete(&uid(1)).is_some());
        assert_eq!(table.len(), 1);
        table.delete_all();
        assert!(table.is_empty());
    }

    #[test]
    fn test_freshness_predicates() {
        let mut n = node(1, NodeStatus::Alive);
        n.restart_counter = 5;
        n.events_tx.insert(0, 10);

        assert!(n.suitable_restart_counter(6));
        assert!(!n.suitable_restart_counter(5));
        assert!(n.suitable_tx(0, 11));
        assert!(!n.suitable_tx(0, 10));
        assert!(n.suitable_tx(1, 0)); // unseen code is always suitable

        assert!(n.suitable_incarnation(6, 0, 0));
        assert!(n.suitable_incarnation(5, 0, 11));
        assert!(!n.suitable_incarnation(5, 0, 10));
        assert!(!n.suitable_incarnation(4, 0, 999));
    }

    #[test]
    fn test_filter_and_oldest() {
        let mut table = NeighbourTable::new();
        table.upsert(uid(0), 10, node(1, NodeStatus::Alive)).expect("upsert");
        table.upsert(uid(0), 10, node(2, NodeStatus::Suspect)).expect("upsert");
        table.upsert(uid(0), 10, node(3, NodeStatus::Alive)).expect("upsert");

        let alive = table.filter_by_status(&[NodeStatus::Alive]);
        assert_eq!(alive.len(), 2);

        let oldest = table
            .get_oldest_by_updated_at(&[NodeStatus::Alive])
            .expect("oldest");
        assert_eq!(oldest.id, uid(1));
    }
}
