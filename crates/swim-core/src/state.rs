//! Cluster identity and the single-owner node state object.

use std::collections::{HashMap, HashSet};
use std::fmt;

use swim_proto::event::NodeStatus;
use uuid::Uuid;

use crate::dissemination::OutgoingQueue;
use crate::neighbour::NeighbourTable;
use crate::round::RoundPlanner;
use crate::{CoreError, Result};

/// Cluster identity shared by every member. `password` is never
/// exposed through `Debug` or any getter; only the derived
/// `secret_key` is used by the rest of the system.
pub struct Cluster {
    pub id: Uuid,
    pub name: String,
    pub desc: String,
    pub namespace: String,
    pub tags: HashSet<String>,
    password: String,
    secret_key: [u8; swim_crypto::kdf::KEY_LEN],
    pub cluster_size: u32,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("tags", &self.tags)
            .field("password", &"<redacted>")
            .field("cluster_size", &self.cluster_size)
            .finish()
    }
}

impl Cluster {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        name: String,
        desc: String,
        namespace: String,
        tags: HashSet<String>,
        password: String,
        cluster_size: u32,
    ) -> Result<Self> {
        if password.len() < swim_crypto::kdf::MIN_PASSWORD_LEN {
            return Err(CoreError::Validation(format!(
                "password must be at least {} characters",
                swim_crypto::kdf::MIN_PASSWORD_LEN
            )));
        }
        if cluster_size == 0 {
            return Err(CoreError::Validation("cluster_size must be positive".into()));
        }
        let secret_key = swim_crypto::kdf::derive_key(&password)?;
        Ok(Self {
            id,
            name,
            desc,
            namespace,
            tags,
            password,
            secret_key,
            cluster_size,
        })
    }

    pub fn secret_key(&self) -> &[u8; swim_crypto::kdf::KEY_LEN] {
        &self.secret_key
    }
}

/// An outstanding ping attempt, keyed by `(neighbour_id, ts)` in
/// [`NodeState::ping_events`] / [`NodeState::indirect_ping_events`].
#[derive(Clone, Debug)]
pub struct PingRecord {
    pub neighbour_id: Uuid,
    pub attempt_number: u32,
    pub ts: u64,
    /// Set for an indirect ping: the relay node asked to forward it.
    pub relay_id: Option<Uuid>,
}

/// A probe this node issued, keyed by `probe_key` in
/// [`NodeState::probe_events`].
#[derive(Clone, Debug)]
pub struct ProbeRecord {
    pub host: String,
    pub port: u16,
}

/// The single-owner membership state object. All mutation goes
/// through its methods; getters return owned snapshots so no
/// reference escapes whatever lock wraps this in `swim-core`'s
/// caller (a `tokio::sync::Mutex<NodeState>`).
pub struct NodeState {
    pub cluster: Cluster,
    id: Uuid,
    host: String,
    port: u16,
    restart_counter: u64,
    tx: u64,
    status: NodeStatus,
    neighbours: NeighbourTable,
    outgoing_events: OutgoingQueue,
    ping_round_buffer: RoundPlanner,
    ping_events: HashMap<(Uuid, u64), PingRecord>,
    indirect_ping_events: HashMap<(Uuid, u64), PingRecord>,
    probe_events: HashMap<Uuid, ProbeRecord>,
    payload: Vec<u8>,
    bad_frame_count: u64,
}

impl NodeState {
    pub fn new(cluster: Cluster, id: Uuid, host: String, port: u16) -> Self {
        Self {
            cluster,
            id,
            host,
            port,
            restart_counter: 0,
            tx: 0,
            status: NodeStatus::Stop,
            neighbours: NeighbourTable::new(),
            outgoing_events: OutgoingQueue::new(),
            ping_round_buffer: RoundPlanner::new(),
            ping_events: HashMap::new(),
            indirect_ping_events: HashMap::new(),
            probe_events: HashMap::new(),
            payload: Vec::new(),
            bad_frame_count: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn host(&self) -> String {
        self.host.clone()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn restart_counter(&self) -> u64 {
        self.restart_counter
    }

    pub fn tx(&self) -> u64 {
        self.tx
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
    }

    /// The sole mutator of `tx` : called once per
    /// outgoing event built and once per inbound event processed.
    pub fn inc_tx(&mut self) -> u64 {
        self.tx += 1;
        self.tx
    }

    pub fn inc_restart_counter(&mut self) -> u64 {
        self.restart_counter += 1;
        self.restart_counter
    }

    pub fn reset_tx(&mut self) {
        self.tx = 0;
    }

    pub fn payload(&self) -> Vec<u8> {
        self.payload.clone()
    }

    pub fn set_payload(&mut self, payload: Vec<u8>, max_payload_size: usize) -> Result<()> {
        if payload.len() > max_payload_size {
            return Err(CoreError::OversizedPayload {
                len: payload.len(),
                max: max_payload_size,
            });
        }
        self.payload = payload;
        Ok(())
    }

    pub fn bad_frame_count(&self) -> u64 {
        self.bad_frame_count
    }

    pub fn inc_bad_frame_count(&mut self) -> u64 {
        self.bad_frame_count += 1;
        self.bad_frame_count
    }

    pub fn neighbours(&self) -> &NeighbourTable {
        &self.neighbours
    }

    pub fn neighbours_mut(&mut self) -> &mut NeighbourTable {
        &mut self.neighbours
    }

    pub fn outgoing(&mut self) -> &mut OutgoingQueue {
        &mut self.outgoing_events
    }

    pub fn round_planner(&mut self) -> &mut RoundPlanner {
        &mut self.ping_round_buffer
    }

    pub fn ping_events(&mut self) -> &mut HashMap<(Uuid, u64), PingRecord> {
        &mut self.ping_events
    }

    pub fn indirect_ping_events(&mut self) -> &mut HashMap<(Uuid, u64), PingRecord> {
        &mut self.indirect_ping_events
    }

    pub fn probe_events(&mut self) -> &mut HashMap<Uuid, ProbeRecord> {
        &mut self.probe_events
    }

    /// `1 + len(neighbours)`: this node counted alongside every known
    /// neighbour, regardless of status.
    pub fn nodes_in_cluster(&self) -> u32 {
        u32::try_from(self.neighbours.len()).unwrap_or(u32::MAX) + 1
    }

    pub fn alive_neighbour_ids(&self) -> Vec<Uuid> {
        self.neighbours
            .filter_by_status(&[NodeStatus::Alive])
            .into_iter()
            .map(|n| n.id)
            .collect()
    }

    /// Reset all ping-related bookkeeping and the outgoing queue
    /// (`stop` step).
    pub fn clear_transient_state(&mut self) {
        self.ping_events.clear();
        self.indirect_ping_events.clear();
        self.probe_events.clear();
        self.outgoing_events = OutgoingQueue::new();
        self.tx = 0;
    }
}
