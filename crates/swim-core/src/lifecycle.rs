//! `Node`: start/join/leave/stop and the async drivers.
//!
//! Generic over `T: Transport` rather than `Arc<dyn Transport>`, since
//! `swim-net::Transport`'s async-fn-in-trait shape is not
//! dyn-compatible. `NodeState` sits behind one `tokio::sync::Mutex` as
//! the single mutation authority; join-await and the rejoin watcher
//! wake on a `tokio::sync::Notify` fired after every processed inbound
//! batch, with shutdown coordinated via `tokio::select!`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use swim_net::Transport;
use swim_proto::codec::{decode_batch, encode_batch};
use swim_proto::event::{Access, Event, Join, Left, NodeStatus, Probe};

use crate::config::SwimConfig;
use crate::detector::{self, TimeoutEffect};
use crate::diag::{DiagRecord, DiagSink, NoopDiagSink};
use crate::neighbour::NeighbourNode;
use crate::processor::{self, Outbound};
use crate::state::{Cluster, NodeState, ProbeRecord};
use crate::{CoreError, Result};

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A running (or not-yet-started) membership node. Cheap to clone via
/// `Arc<Node<T>>`; every public method takes `&self` or `self: &Arc<Self>`
/// and locks `state` for the shortest span it can.
pub struct Node<T: Transport> {
    state: Mutex<NodeState>,
    config: SwimConfig,
    transport: T,
    diag: Arc<dyn DiagSink>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    status_notify: Notify,
    rejoin_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> Node<T> {
    pub fn new(
        cluster: Cluster,
        id: Uuid,
        host: String,
        port: u16,
        config: SwimConfig,
        transport: T,
        diag: Arc<dyn DiagSink>,
    ) -> Arc<Self> {
        let diag: Arc<dyn DiagSink> = if config.enable_diag_tap {
            diag
        } else {
            Arc::new(NoopDiagSink)
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(NodeState::new(cluster, id, host, port)),
            config,
            transport,
            diag,
            shutdown_tx,
            shutdown_rx,
            status_notify: Notify::new(),
            rejoin_handle: Mutex::new(None),
        })
    }

    pub async fn status(&self) -> NodeStatus {
        self.state.lock().await.status()
    }

    /// Pre-populate the neighbour table with a known contact address.
    /// The distilled lifecycle contract names `join` as sending to
    /// "random alive neighbours" but never describes how a node first
    /// learns of any; this is the bootstrap seam that fills the table
    /// before `join` is called, resolved here in favor of an explicit
    /// call rather than a config-file seed list.
    pub async fn add_seed(&self, id: Uuid, host: impl Into<String>, port: u16) -> Result<()> {
        let mut state = self.state.lock().await;
        let cluster_size = state.cluster.cluster_size;
        let self_id = state.id();
        let neighbour = NeighbourNode::new(id, host.into(), port, NodeStatus::Alive, Access::Direct);
        state.neighbours_mut().upsert(self_id, cluster_size, neighbour)?;
        Ok(())
    }

    pub async fn set_payload(&self, payload: Vec<u8>) -> Result<()> {
        let max = self.config.max_payload_size;
        self.state.lock().await.set_payload(payload, max)
    }

    /// The status this node currently has `id` recorded as, if any.
    pub async fn neighbour_status(&self, id: Uuid) -> Option<NodeStatus> {
        self.state.lock().await.neighbours().get(&id).map(|n| n.status)
    }

    /// Every neighbour id currently known, regardless of status.
    pub async fn neighbour_ids(&self) -> Vec<Uuid> {
        self.state.lock().await.neighbours().ids()
    }

    /// The access method this node currently has `id` recorded as, if any.
    pub async fn neighbour_access(&self, id: Uuid) -> Option<swim_proto::event::Access> {
        self.state.lock().await.neighbours().get(&id).map(|n| n.access)
    }

    /// `start`: only from `stop`. Sets `status=left`,
    /// `tx=1`, and spawns the single receive-loop task; the transport
    /// itself is already bound by the caller before construction and
    /// handed in, rather than built here.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.status() != NodeStatus::Stop {
                return Err(CoreError::Start("node is not in stop state".into()));
            }
            state.set_status(NodeStatus::Left);
            state.reset_tx();
            state.inc_tx();
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.receive_loop().await });
        self.diag.record(DiagRecord {
            cmd: "node_started",
            node_id: self.state.lock().await.id(),
            data: serde_json::json!({}),
        });
        Ok(())
    }

    /// `join`: no-op if already `alive`/`join`. For
    /// `cluster_size==1` goes straight to `alive`; otherwise sends
    /// `JoinEvent`s to `n` random alive neighbours and waits up to
    /// `max_join_time_ms` for confirmation.
    pub async fn join(self: &Arc<Self>) -> bool {
        self.join_inner(true).await
    }

    async fn join_inner(self: &Arc<Self>, spawn_watcher: bool) -> bool {
        {
            let status = self.state.lock().await.status();
            if status == NodeStatus::Alive || status == NodeStatus::Join {
                return true;
            }
        }

        let cluster_size = {
            let mut state = self.state.lock().await;
            state.inc_restart_counter();
            state.reset_tx();
            state.cluster.cluster_size
        };

        if cluster_size == 1 {
            let mut state = self.state.lock().await;
            state.neighbours_mut().delete_all();
            state.set_status(NodeStatus::Alive);
            drop(state);
            self.status_notify.notify_waiters();
            self.spawn_heartbeat();
            if spawn_watcher {
                self.maybe_spawn_rejoin_watcher().await;
            }
            return true;
        }

        let targets = {
            let mut state = self.state.lock().await;
            state.set_status(NodeStatus::Join);
            let alive = state.alive_neighbour_ids();
            let nodes_in_cluster = state.nodes_in_cluster();
            let target_ids = state
                .round_planner()
                .next_round(nodes_in_cluster as usize, &alive);
            target_ids
                .into_iter()
                .filter_map(|id| state.neighbours().get(&id).map(|n| (n.host.clone(), n.port)))
                .collect::<Vec<_>>()
        };

        for (host, port) in &targets {
            let join_event = {
                let mut state = self.state.lock().await;
                let tx = state.inc_tx();
                Join::build(state.id(), state.restart_counter(), tx, state.host(), state.port())
            };
            match join_event {
                Ok(ev) => self.send_events(host, *port, &[Event::Join(ev)]).await,
                Err(e) => warn!(error = %e, "failed to build join event"),
            }
        }

        let max_wait = Duration::from_millis(self.config.max_join_time_ms);
        let joined = tokio::time::timeout(max_wait, self.await_join_outcome()).await;

        match joined {
            Ok(true) => {
                self.spawn_heartbeat();
                if spawn_watcher {
                    self.maybe_spawn_rejoin_watcher().await;
                }
                true
            }
            _ => {
                let mut state = self.state.lock().await;
                if state.status() == NodeStatus::Join {
                    state.set_status(NodeStatus::Left);
                }
                false
            }
        }
    }

    async fn await_join_outcome(&self) -> bool {
        loop {
            let notified = self.status_notify.notified();
            let status = self.state.lock().await.status();
            match status {
                NodeStatus::Alive => return true,
                NodeStatus::Join => {}
                _ => return false,
            }
            notified.await;
        }
    }

    /// `leave`: idempotent if already `left`. No ack
    /// required for the `LeftEvent`.
    pub async fn leave(&self) -> Result<()> {
        let targets = {
            let mut state = self.state.lock().await;
            if state.status() == NodeStatus::Left {
                return Ok(());
            }
            let alive = state.alive_neighbour_ids();
            let nodes_in_cluster = state.nodes_in_cluster();
            let target_ids = state
                .round_planner()
                .next_round(nodes_in_cluster as usize, &alive);
            target_ids
                .into_iter()
                .filter_map(|id| state.neighbours().get(&id).map(|n| (n.host.clone(), n.port)))
                .collect::<Vec<_>>()
        };

        for (host, port) in &targets {
            let left_event = {
                let mut state = self.state.lock().await;
                let tx = state.inc_tx();
                Left::build(state.id(), state.restart_counter(), tx)?
            };
            self.send_events(host, *port, &[Event::Left(left_event)]).await;
        }

        self.stop_rejoin_watcher().await;
        self.state.lock().await.set_status(NodeStatus::Left);
        self.status_notify.notify_waiters();
        Ok(())
    }

    /// `stop`: leave, close the receive loop, reset ping
    /// tables and the outgoing queue, zero `tx`, transition to `stop`.
    pub async fn stop(&self) -> Result<()> {
        self.leave().await?;
        let _ = self.shutdown_tx.send(true);
        let mut state = self.state.lock().await;
        state.clear_transient_state();
        state.set_status(NodeStatus::Stop);
        Ok(())
    }

    /// `probe`: build and send a `ProbeEvent`, returning its
    /// `probe_key` so the caller can correlate a future `ProbeAck`.
    pub async fn probe(&self, host: impl Into<String>, port: u16) -> Result<Uuid> {
        let host = host.into();
        let probe_key = Uuid::new_v4();
        let event = {
            let mut state = self.state.lock().await;
            state
                .probe_events()
                .insert(probe_key, ProbeRecord { host: host.clone(), port });
            let tx = state.inc_tx();
            Probe::build(state.id(), state.restart_counter(), tx, probe_key, host.clone(), port)?
        };
        self.send_events(&host, port, &[Event::Probe(event)]).await;
        Ok(probe_key)
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.heartbeat_loop().await });
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let period = Duration::from_millis(self.config.ping_heartbeat_ms);
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(period) => {
                    if self.state.lock().await.status() != NodeStatus::Alive {
                        break;
                    }
                    self.run_heartbeat_tick().await;
                }
            }
        }
    }

    /// The heartbeat loop's steps (i)-(iv): drain pending outgoing
    /// once, pick `n` round targets, and for each build+register+send
    /// a `[outgoing…, ping]` bundle.
    async fn run_heartbeat_tick(&self) {
        let now_ts = now_millis();
        let (targets, outgoing) = {
            let mut state = self.state.lock().await;
            let alive = state.alive_neighbour_ids();
            let nodes_in_cluster = state.nodes_in_cluster();
            let targets = state
                .round_planner()
                .next_round(nodes_in_cluster as usize, &alive);
            let outgoing = state.outgoing().take_events(usize::MAX);
            (targets, outgoing)
        };

        for target in targets {
            let Some((dest_host, dest_port)) = self.neighbour_addr(target).await else {
                continue;
            };
            let ping_event = {
                let mut state = self.state.lock().await;
                detector::start_ping(&mut state, target, now_ts)
            };
            match ping_event {
                Ok(ev) => {
                    let mut bundle = outgoing.clone();
                    bundle.push(ev);
                    self.send_events(&dest_host, dest_port, &bundle).await;
                    self.schedule_ack_timeout(target, now_ts);
                }
                Err(e) => warn!(error = %e, neighbour_id = %target, "failed to build ping"),
            }
        }
    }

    async fn neighbour_addr(&self, id: Uuid) -> Option<(String, u16)> {
        self.state
            .lock()
            .await
            .neighbours()
            .get(&id)
            .map(|n| (n.host.clone(), n.port))
    }

    fn schedule_ack_timeout(self: &Arc<Self>, neighbour_id: Uuid, ts: u64) {
        let this = Arc::clone(self);
        let wait = Duration::from_millis(self.config.ack_timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            this.fire_ping_timeout(neighbour_id, ts).await;
        });
    }

    async fn fire_ping_timeout(self: Arc<Self>, neighbour_id: Uuid, ts: u64) {
        let now_ts = now_millis();
        let effect = {
            let mut state = self.state.lock().await;
            detector::on_ping_timeout(&mut state, &self.config, neighbour_id, ts, now_ts)
        };
        match effect {
            Ok(TimeoutEffect::Retry(event)) => {
                if let Some((host, port)) = self.neighbour_addr(neighbour_id).await {
                    self.send_events(&host, port, std::slice::from_ref(&event)).await;
                }
                self.schedule_ack_timeout(neighbour_id, now_ts);
            }
            Ok(TimeoutEffect::Indirect { relay_id, event }) => {
                if let Some((host, port)) = self.neighbour_addr(relay_id).await {
                    self.send_events(&host, port, std::slice::from_ref(&event)).await;
                }
                self.schedule_indirect_timeout(neighbour_id, now_ts);
            }
            Ok(TimeoutEffect::MarkedDead(event)) => {
                let node_id = {
                    let mut state = self.state.lock().await;
                    state.outgoing().put_event(event);
                    state.id()
                };
                self.status_notify.notify_waiters();
                self.diag.record(DiagRecord {
                    cmd: "neighbour_marked_dead",
                    node_id,
                    data: serde_json::json!({ "neighbour_id": neighbour_id.to_string() }),
                });
            }
            Ok(TimeoutEffect::Cleared) => {}
            Err(e) => warn!(error = %e, neighbour_id = %neighbour_id, "ping timeout handling error"),
        }
    }

    fn schedule_indirect_timeout(self: &Arc<Self>, neighbour_id: Uuid, ts: u64) {
        let this = Arc::clone(self);
        let wait = Duration::from_millis(self.config.ack_timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            this.fire_indirect_timeout(neighbour_id, ts).await;
        });
    }

    async fn fire_indirect_timeout(self: Arc<Self>, neighbour_id: Uuid, ts: u64) {
        let now_ts = now_millis();
        let effect = {
            let mut state = self.state.lock().await;
            detector::on_indirect_timeout(&mut state, &self.config, neighbour_id, ts, now_ts)
        };
        match effect {
            Ok(TimeoutEffect::Indirect { relay_id, event }) => {
                if let Some((host, port)) = self.neighbour_addr(relay_id).await {
                    self.send_events(&host, port, std::slice::from_ref(&event)).await;
                }
                self.schedule_indirect_timeout(neighbour_id, now_ts);
            }
            Ok(TimeoutEffect::MarkedDead(event)) => {
                let node_id = {
                    let mut state = self.state.lock().await;
                    state.outgoing().put_event(event);
                    state.id()
                };
                self.status_notify.notify_waiters();
                self.diag.record(DiagRecord {
                    cmd: "neighbour_marked_dead",
                    node_id,
                    data: serde_json::json!({ "neighbour_id": neighbour_id.to_string() }),
                });
            }
            Ok(TimeoutEffect::Cleared) | Ok(TimeoutEffect::Retry(_)) => {}
            Err(e) => warn!(error = %e, neighbour_id = %neighbour_id, "indirect timeout handling error"),
        }
    }

    /// The rejoin watcher: installed once after a successful
    /// join when `rejoin_if_dead?`, and kept alive across rejoins so a
    /// second observed death still counts against the same
    /// `rejoin_max_attempts` budget.
    async fn maybe_spawn_rejoin_watcher(self: &Arc<Self>) {
        if !self.config.rejoin_if_dead {
            return;
        }
        let mut handle = self.rejoin_handle.lock().await;
        if handle.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { this.rejoin_watcher().await }));
    }

    async fn stop_rejoin_watcher(&self) {
        if let Some(handle) = self.rejoin_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn rejoin_watcher(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut last_status = NodeStatus::Alive;
        let mut attempts = 0u32;
        loop {
            let notified = self.status_notify.notified();
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = notified => {
                    let current = self.state.lock().await.status();
                    if last_status == NodeStatus::Alive && current == NodeStatus::Left {
                        attempts += 1;
                        if attempts > self.config.rejoin_max_attempts {
                            break;
                        }
                        if self.join_inner(false).await {
                            attempts = 0;
                        }
                    }
                    last_status = current;
                }
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                received = self.transport.recv_from() => {
                    match received {
                        Ok((bytes, host, port)) => self.handle_frame(&bytes, &host, port).await,
                        Err(e) => warn!(error = %e, "transport receive error"),
                    }
                }
            }
        }
    }

    /// `BadFrame` (decryption failure) and a malformed outer envelope
    /// are swallowed with a counter increment, policy
    /// that the receive loop must not die on either.
    async fn handle_frame(&self, bytes: &[u8], from_host: &str, from_port: u16) {
        let key = *self.state.lock().await.cluster.secret_key();
        let plaintext = match swim_crypto::aesgcm::decrypt(&key, bytes) {
            Ok(p) => p,
            Err(_) => {
                self.state.lock().await.inc_bad_frame_count();
                return;
            }
        };
        let events = match decode_batch(&plaintext) {
            Ok(events) => events,
            Err(_) => {
                self.state.lock().await.inc_bad_frame_count();
                return;
            }
        };

        let mut outbound: Vec<Outbound> = Vec::new();
        for event in events {
            let code = event.code();
            let mut state = self.state.lock().await;
            let node_id = state.id();
            match processor::process(&mut state, &self.config, from_host, from_port, event) {
                Ok(out) => outbound.extend(out),
                Err(e) => warn!(error = %e, "event processing failed"),
            }
            drop(state);
            self.status_notify.notify_waiters();
            self.diag.record(DiagRecord {
                cmd: "event_received",
                node_id,
                data: serde_json::json!({ "code": code }),
            });
        }

        for ob in outbound {
            self.send_events(&ob.host, ob.port, std::slice::from_ref(&ob.event)).await;
        }
    }

    async fn send_events(&self, host: &str, port: u16, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        match self.build_frame(events).await {
            Ok(frame) => {
                if let Err(e) = self.transport.send_to(host, port, &frame).await {
                    warn!(error = %e, host, port, "frame send failed");
                }
            }
            Err(e) => warn!(error = %e, host, port, "failed to build outgoing frame"),
        }
    }

    async fn build_frame(&self, events: &[Event]) -> Result<Vec<u8>> {
        let plaintext = encode_batch(events)?;
        let key = *self.state.lock().await.cluster.secret_key();
        let frame = swim_crypto::aesgcm::encrypt(&key, &plaintext)?;
        if frame.len() > self.config.max_udp_size && !self.config.ignore_max_udp_size {
            return Err(CoreError::OversizedFrame {
                len: frame.len(),
                max: self.config.max_udp_size,
            });
        }
        Ok(frame)
    }
}
