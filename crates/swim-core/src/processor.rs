//! Event processor: the per-event state transition dispatcher.
//!
//! `process` is an exhaustive match over [`Event`]: each arm is a
//! function `(NodeState, Event) -> Effects`. Effects are returned as
//! addressed outbound datagrams rather than always-to-sender replies,
//! since a handful of
//! arms (the indirect-ping relay forwards) must reply to a third
//! address, not back to whoever handed them the frame.

use swim_proto::event::{
    Ack, Alive, AntiEntropy, Dead, Event, IndirectAck, IndirectPing, Left, NewClusterSize,
    NodeStatus, Ping, PayloadEvent, Probe, ProbeAck,
};
use swim_proto::{CODE_ACK, CODE_ALIVE, CODE_ANTI_ENTROPY, CODE_DEAD, CODE_PAYLOAD};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SwimConfig;
use crate::detector;
use crate::dissemination::anti_entropy_snapshot;
use crate::neighbour::NeighbourNode;
use crate::state::NodeState;
use crate::Result;

/// An outbound datagram produced while processing one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub host: String,
    pub port: u16,
    pub event: Event,
}

fn reply(host: impl Into<String>, port: u16, event: Event) -> Outbound {
    Outbound {
        host: host.into(),
        port,
        event,
    }
}

/// Process one inbound event and return the outbound datagrams it
/// produces. `tx` is incremented exactly once, even for events that
/// are ultimately dropped (an unrecognized event still costs a `tx`
/// slot, by design).
pub fn process(
    state: &mut NodeState,
    config: &SwimConfig,
    from_host: &str,
    from_port: u16,
    event: Event,
) -> Result<Vec<Outbound>> {
    state.inc_tx();

    let out = match event {
        Event::Probe(p) => handle_probe(state, from_host, from_port, p)?,
        Event::ProbeAck(pa) => handle_probe_ack(state, pa),
        Event::Join(j) => handle_join(state, config, j)?,
        Event::Alive(a) => handle_alive(state, a),
        Event::Suspect(s) => {
            debug!(neighbour_id = %s.neighbour_id, "suspect observed, not propagated");
            Vec::new()
        }
        Event::Dead(d) => handle_dead(state, d)?,
        Event::Left(l) => handle_left(state, l),
        Event::Payload(p) => handle_payload(state, p),
        Event::NewClusterSize(n) => handle_new_cluster_size(state, n),
        Event::AntiEntropy(ae) => handle_anti_entropy(state, ae),
        Event::Ping(p) => handle_ping(state, config, p)?,
        Event::Ack(a) => handle_ack(state, a),
        Event::IndirectAck(ia) => handle_indirect_ack(state, ia)?,
        Event::IndirectPing(ip) => handle_indirect_ping(state, ip)?,
        Event::Unknown(code) => {
            debug!(code, "event_processing_default");
            Vec::new()
        }
    };
    Ok(out)
}

/// True if `sender` is a known neighbour whose stored incarnation is
/// as new or newer than `(restart_counter, code, tx)` — i.e. the
/// inbound claim is stale and should be ignored.
fn is_stale(state: &NodeState, sender: Uuid, restart_counter: u64, code: u8, tx: u64) -> bool {
    match state.neighbours().get(&sender) {
        Some(n) => !n.suitable_incarnation(restart_counter, code, tx),
        None => false,
    }
}

fn handle_probe(
    state: &mut NodeState,
    from_host: &str,
    from_port: u16,
    probe: Probe,
) -> Result<Vec<Outbound>> {
    let tx = state.inc_tx();
    let ack = ProbeAck::build(
        state.id(),
        state.restart_counter(),
        tx,
        probe.probe_key,
        probe.id,
        state.status(),
        state.host(),
        state.port(),
    )?;
    let dest_host = if probe.host.is_empty() {
        from_host.to_string()
    } else {
        probe.host.clone()
    };
    let dest_port = if probe.port == 0 { from_port } else { probe.port };
    Ok(vec![reply(dest_host, dest_port, Event::ProbeAck(ack))])
}

fn handle_probe_ack(state: &mut NodeState, ack: ProbeAck) -> Vec<Outbound> {
    let issued = state.probe_events().remove(&ack.probe_key);
    if issued.is_none() || ack.neighbour_id != state.id() {
        return Vec::new();
    }

    if state.status() != NodeStatus::Alive {
        let cluster_size = state.cluster.cluster_size;
        let neighbour = NeighbourNode::new(
            ack.id,
            ack.host,
            ack.port,
            ack.status,
            swim_proto::event::Access::Direct,
        );
        let _ = state
            .neighbours_mut()
            .upsert(state.id(), cluster_size, neighbour);
    }
    Vec::new()
}

fn handle_join(state: &mut NodeState, config: &SwimConfig, join: swim_proto::event::Join) -> Result<Vec<Outbound>> {
    if join.id == state.id() {
        return Ok(Vec::new());
    }

    let known = state.neighbours().get(&join.id).cloned();
    let cluster_size = state.cluster.cluster_size;
    let would_exceed = known.is_none() && state.nodes_in_cluster() >= cluster_size;
    let stale = known
        .as_ref()
        .map(|n| !n.suitable_restart_counter(join.restart_counter))
        .unwrap_or(false);

    if would_exceed || stale {
        let known_restart_counter = known.as_ref().map(|n| n.restart_counter).unwrap_or(0);
        let dead = dead_event(state, join.id, known_restart_counter, 0)?;
        return Ok(vec![reply(join.host.clone(), join.port, dead)]);
    }

    let neighbour = NeighbourNode::new(
        join.id,
        join.host.clone(),
        join.port,
        NodeStatus::Alive,
        swim_proto::event::Access::Direct,
    );
    state
        .neighbours_mut()
        .upsert(state.id(), cluster_size, neighbour)?;

    let mut out = Vec::new();

    let tx = state.inc_tx();
    let alive = Alive::build(
        state.id(),
        state.restart_counter(),
        tx,
        join.id,
        join.restart_counter,
        join.tx,
        join.host.clone(),
        join.port,
    )?;
    out.push(Event::Alive(alive.clone()));
    state.outgoing().put_event(Event::Alive(alive));

    let old_size = cluster_size;
    let new_size = state.nodes_in_cluster().max(old_size);
    let tx = state.inc_tx();
    let ncs = NewClusterSize::build(state.id(), state.restart_counter(), tx, old_size, new_size)?;
    out.push(Event::NewClusterSize(ncs.clone()));
    state.outgoing().put_event(Event::NewClusterSize(ncs));
    state.cluster.cluster_size = new_size;

    let tx = state.inc_tx();
    let entries = anti_entropy_snapshot(state.neighbours(), config.max_anti_entropy_items, None);
    let ae = AntiEntropy::build(state.id(), state.restart_counter(), tx, entries)?;
    out.push(Event::AntiEntropy(ae));

    Ok(out
        .into_iter()
        .map(|e| reply(join.host.clone(), join.port, e))
        .collect())
}

fn handle_alive(state: &mut NodeState, alive: Alive) -> Vec<Outbound> {
    let join_confirm = alive.neighbour_id == state.id() && state.status() == NodeStatus::Join;
    if join_confirm {
        state.set_status(NodeStatus::Alive);
        return Vec::new();
    }

    if alive.id == state.id() || alive.neighbour_id == state.id() {
        return Vec::new();
    }
    if is_stale(
        state,
        alive.neighbour_id,
        alive.neighbour_restart_counter,
        CODE_ALIVE,
        alive.neighbour_tx,
    ) {
        return Vec::new();
    }

    let cluster_size = state.cluster.cluster_size;
    let neighbour = NeighbourNode::new(
        alive.neighbour_id,
        alive.neighbour_host.clone(),
        alive.neighbour_port,
        NodeStatus::Alive,
        swim_proto::event::Access::Direct,
    );
    if state
        .neighbours_mut()
        .upsert(state.id(), cluster_size, neighbour)
        .is_ok()
    {
        state.outgoing().put_event(Event::Alive(alive));
    }
    Vec::new()
}

fn handle_dead(state: &mut NodeState, dead: Dead) -> Result<Vec<Outbound>> {
    if dead.neighbour_id == state.id() {
        let sender_alive = state
            .neighbours()
            .get(&dead.id)
            .map(|n| n.status == NodeStatus::Alive)
            .unwrap_or(false);
        if sender_alive && !is_stale(state, dead.id, dead.restart_counter, CODE_DEAD, dead.tx) {
            state.set_status(NodeStatus::Left);
        }
        return Ok(Vec::new());
    }

    let cluster_size = state.cluster.cluster_size;
    if state.neighbours().get(&dead.id).is_none() {
        let _ = state.neighbours_mut().upsert(
            state.id(),
            cluster_size,
            NeighbourNode::new(
                dead.id,
                String::new(),
                1,
                NodeStatus::Alive,
                swim_proto::event::Access::Direct,
            ),
        );
    }

    let target_fresh_or_older = state
        .neighbours()
        .get(&dead.neighbour_id)
        .map(|n| n.restart_counter <= dead.neighbour_restart_counter)
        .unwrap_or(false);
    if target_fresh_or_older {
        if let Some(n) = state.neighbours_mut().get_mut(&dead.neighbour_id) {
            n.status = NodeStatus::Dead;
        }
        state.outgoing().put_event(Event::Dead(dead));
    }
    Ok(Vec::new())
}

fn handle_left(state: &mut NodeState, left: Left) -> Vec<Outbound> {
    if let Some(n) = state.neighbours_mut().get_mut(&left.id) {
        n.status = NodeStatus::Left;
    }
    state.outgoing().put_event(Event::Left(left));
    Vec::new()
}

fn handle_payload(state: &mut NodeState, payload: PayloadEvent) -> Vec<Outbound> {
    let fresh = state
        .neighbours()
        .get(&payload.id)
        .map(|n| n.suitable_tx(CODE_PAYLOAD, payload.tx))
        .unwrap_or(true);
    if fresh {
        if let Some(n) = state.neighbours_mut().get_mut(&payload.id) {
            n.payload = payload.payload.clone();
            n.events_tx.insert(CODE_PAYLOAD, payload.tx);
        }
        state.outgoing().put_event(Event::Payload(payload));
    }
    Vec::new()
}

fn handle_new_cluster_size(state: &mut NodeState, ncs: NewClusterSize) -> Vec<Outbound> {
    if ncs.new_size >= state.nodes_in_cluster() {
        state.cluster.cluster_size = ncs.new_size;
        state.outgoing().put_event(Event::NewClusterSize(ncs));
    } else {
        debug!(
            new_size = ncs.new_size,
            "new_cluster_size dropped: less than alive nodes"
        );
    }
    Vec::new()
}

fn handle_anti_entropy(state: &mut NodeState, ae: AntiEntropy) -> Vec<Outbound> {
    let cluster_size = state.cluster.cluster_size;
    for entry in &ae.entries {
        if entry.id == state.id() {
            continue;
        }
        let fresh = state
            .neighbours()
            .get(&entry.id)
            .map(|n| n.restart_counter < entry.restart_counter)
            .unwrap_or(true);
        if fresh {
            let mut neighbour = NeighbourNode::new(
                entry.id,
                entry.host.clone(),
                entry.port,
                entry.status,
                entry.access,
            );
            neighbour.restart_counter = entry.restart_counter;
            neighbour.events_tx = entry.events_tx.iter().copied().collect();
            neighbour.payload = entry.payload.clone();
            let _ = state
                .neighbours_mut()
                .upsert(state.id(), cluster_size, neighbour);
        }
    }

    if let Some(n) = state.neighbours_mut().get_mut(&ae.id) {
        n.restart_counter = n.restart_counter.max(ae.restart_counter);
        n.events_tx.insert(CODE_ANTI_ENTROPY, ae.tx);
    }
    Vec::new()
}

fn handle_ping(state: &mut NodeState, config: &SwimConfig, ping: Ping) -> Result<Vec<Outbound>> {
    let known = state.neighbours().get(&ping.id).cloned();
    let stale = known
        .as_ref()
        .map(|n| n.restart_counter > ping.restart_counter)
        .unwrap_or(false);

    if known.is_none() || stale {
        let dead = dead_event(state, ping.id, ping.restart_counter, ping.tx)?;
        return Ok(vec![reply(ping.host.clone(), ping.port, dead)]);
    }

    if ping.neighbour_id != state.id() {
        warn!(ping_id = %ping.id, "ping neighbour_id mismatch, self is not the target");
        return Ok(Vec::new());
    }

    let cluster_size = state.cluster.cluster_size;
    let neighbour = NeighbourNode::new(
        ping.id,
        ping.host.clone(),
        ping.port,
        NodeStatus::Alive,
        swim_proto::event::Access::Direct,
    );
    state
        .neighbours_mut()
        .upsert(state.id(), cluster_size, neighbour)?;

    let tx = state.inc_tx();
    let ack = Ack::build(
        state.id(),
        state.restart_counter(),
        tx,
        ping.id,
        state.tx(),
        ping.attempt_number,
        ping.ts,
    )?;

    // spec's anti-entropy healing piggybacks a snapshot on the ping
    // response so the pinger can learn about members it doesn't know.
    let ae_tx = state.inc_tx();
    let entries = anti_entropy_snapshot(state.neighbours(), config.max_anti_entropy_items, None);
    let ae = AntiEntropy::build(state.id(), state.restart_counter(), ae_tx, entries)?;

    Ok(vec![
        reply(ping.host.clone(), ping.port, Event::Ack(ack)),
        reply(ping.host, ping.port, Event::AntiEntropy(ae)),
    ])
}

fn handle_ack(state: &mut NodeState, ack: Ack) -> Vec<Outbound> {
    if ack.neighbour_id != state.id() {
        return Vec::new();
    }
    if detector::confirm_ping(state, ack.id, ack.ts) {
        let cluster_size = state.cluster.cluster_size;
        if let Some(n) = state.neighbours_mut().get_mut(&ack.id) {
            n.restart_counter = ack.restart_counter;
            n.events_tx.insert(CODE_ACK, ack.tx);
        } else {
            let neighbour = NeighbourNode::new(
                ack.id,
                String::new(),
                1,
                NodeStatus::Alive,
                swim_proto::event::Access::Direct,
            );
            let _ = state
                .neighbours_mut()
                .upsert(state.id(), cluster_size, neighbour);
        }
    }
    Vec::new()
}

fn handle_indirect_ack(state: &mut NodeState, ia: IndirectAck) -> Result<Vec<Outbound>> {
    if ia.intermediate_id == state.id() && ia.neighbour_id != state.id() {
        // `neighbour_host`/`neighbour_port` on the wire name the probed
        // target's address, not the original requester's; the relay
        // looks the requester up by `neighbour_id` in its own table.
        let (host, port) = state
            .neighbours()
            .get(&ia.neighbour_id)
            .map(|n| (n.host.clone(), n.port))
            .unwrap_or_else(|| (ia.neighbour_host.clone(), ia.neighbour_port));
        return Ok(vec![reply(host, port, Event::IndirectAck(ia))]);
    }

    if ia.neighbour_id != state.id() {
        return Ok(Vec::new());
    }
    if detector::confirm_indirect(state, ia.id, ia.ts) {
        let cluster_size = state.cluster.cluster_size;
        if let Some(n) = state.neighbours_mut().get_mut(&ia.id) {
            n.restart_counter = ia.restart_counter;
            n.status = NodeStatus::Alive;
            n.access = swim_proto::event::Access::Indirect;
        } else {
            let neighbour = NeighbourNode::new(
                ia.id,
                String::new(),
                1,
                ia.sender_status,
                swim_proto::event::Access::Indirect,
            );
            let _ = state
                .neighbours_mut()
                .upsert(state.id(), cluster_size, neighbour);
        }
    }
    Ok(Vec::new())
}

fn handle_indirect_ping(state: &mut NodeState, ip: IndirectPing) -> Result<Vec<Outbound>> {
    if ip.intermediate_id == state.id() {
        return Ok(vec![reply(
            ip.neighbour_host.clone(),
            ip.neighbour_port,
            Event::IndirectPing(ip),
        )]);
    }

    let tx = state.inc_tx();
    let ack = IndirectAck::build(
        state.id(),
        state.restart_counter(),
        tx,
        ip.id,
        state.tx(),
        ip.attempt_number,
        ip.ts,
        ip.intermediate_id,
        ip.intermediate_host.clone(),
        ip.intermediate_port,
        ip.neighbour_host.clone(),
        ip.neighbour_port,
        state.status(),
    )?;
    Ok(vec![reply(
        ip.intermediate_host,
        ip.intermediate_port,
        Event::IndirectAck(ack),
    )])
}

fn dead_event(
    state: &mut NodeState,
    target: Uuid,
    target_restart_counter: u64,
    target_tx: u64,
) -> Result<Event> {
    let tx = state.inc_tx();
    let dead = Dead::build(
        state.id(),
        state.restart_counter(),
        tx,
        target,
        target_restart_counter,
        target_tx,
    )?;
    Ok(Event::Dead(dead))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Cluster;
    use std::collections::HashSet;

    fn cluster(size: u32) -> Cluster {
        Cluster::new(
            Uuid::from_bytes([9; 16]),
            "c".into(),
            "".into(),
            "ns".into(),
            HashSet::new(),
            "a very long passphrase!".into(),
            size,
        )
        .expect("cluster")
    }

    fn new_state(size: u32) -> NodeState {
        let mut state = NodeState::new(cluster(size), Uuid::from_bytes([0; 16]), "self".into(), 1000);
        state.set_status(NodeStatus::Alive);
        state
    }

    #[test]
    fn test_probe_replies_without_inserting_neighbour() {
        let mut state = new_state(10);
        let config = SwimConfig::default();
        let probe = Probe::build(
            Uuid::from_bytes([1; 16]),
            0,
            0,
            Uuid::from_bytes([42; 16]),
            "peer".into(),
            2000,
        )
        .expect("build");

        let out = process(&mut state, &config, "peer", 2000, Event::Probe(probe)).expect("process");
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].event, Event::ProbeAck(_)));
        assert!(state.neighbours().is_empty());
    }

    #[test]
    fn test_join_admits_and_replies_with_piggyback() {
        let mut state = new_state(10);
        let config = SwimConfig::default();
        let join = swim_proto::event::Join::build(
            Uuid::from_bytes([1; 16]),
            0,
            0,
            "peer".into(),
            2000,
        )
        .expect("build");

        let out = process(&mut state, &config, "peer", 2000, Event::Join(join)).expect("process");
        assert!(out.iter().any(|o| matches!(o.event, Event::Alive(_))));
        assert!(out.iter().any(|o| matches!(o.event, Event::NewClusterSize(_))));
        assert!(out.iter().any(|o| matches!(o.event, Event::AntiEntropy(_))));
        assert!(state.neighbours().contains(&Uuid::from_bytes([1; 16])));
    }

    #[test]
    fn test_join_refuses_when_cluster_full() {
        let mut state = new_state(1);
        let config = SwimConfig::default();
        let join = swim_proto::event::Join::build(
            Uuid::from_bytes([1; 16]),
            0,
            0,
            "peer".into(),
            2000,
        )
        .expect("build");

        let out = process(&mut state, &config, "peer", 2000, Event::Join(join)).expect("process");
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].event, Event::Dead(_)));
    }

    #[test]
    fn test_indirect_ack_restores_known_neighbour_with_indirect_access() {
        use crate::state::PingRecord;
        use swim_proto::event::Access;

        let mut state = new_state(10);
        let config = SwimConfig::default();
        let neighbour_id = Uuid::from_bytes([1; 16]);
        let relay_id = Uuid::from_bytes([3; 16]);

        let neighbour = NeighbourNode::new(
            neighbour_id,
            "peer".into(),
            2000,
            NodeStatus::Suspect,
            Access::Direct,
        );
        state
            .neighbours_mut()
            .upsert(state.id(), 10, neighbour)
            .expect("upsert");
        state.indirect_ping_events().insert(
            (neighbour_id, 42),
            PingRecord {
                neighbour_id,
                attempt_number: 1,
                ts: 42,
                relay_id: Some(relay_id),
            },
        );

        let ia = IndirectAck::build(
            neighbour_id,
            0,
            0,
            state.id(),
            0,
            1,
            42,
            relay_id,
            "relay".into(),
            3000,
            "self".into(),
            1000,
            NodeStatus::Alive,
        )
        .expect("build");

        let out = process(&mut state, &config, "relay", 3000, Event::IndirectAck(ia)).expect("process");
        assert!(out.is_empty());

        let n = state.neighbours().get(&neighbour_id).expect("neighbour present");
        assert_eq!(n.status, NodeStatus::Alive);
        assert_eq!(n.access, Access::Indirect);
    }

    #[test]
    fn test_ping_from_unknown_sender_gets_dead_reply() {
        let mut state = new_state(10);
        let config = SwimConfig::default();
        let ping = Ping::build(
            Uuid::from_bytes([7; 16]),
            "peer".into(),
            2000,
            0,
            1,
            state.id(),
            1,
            1,
        )
        .expect("build");

        let out = process(&mut state, &config, "peer", 2000, Event::Ping(ping)).expect("process");
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].event, Event::Dead(_)));
    }

    #[test]
    fn test_ping_from_known_sender_gets_ack() {
        let mut state = new_state(10);
        let config = SwimConfig::default();
        let sender = Uuid::from_bytes([7; 16]);
        state
            .neighbours_mut()
            .upsert(
                state.id(),
                10,
                NeighbourNode::new(sender, "peer".into(), 2000, NodeStatus::Alive, swim_proto::event::Access::Direct),
            )
            .expect("upsert");

        let ping = Ping::build(sender, "peer".into(), 2000, 0, 1, state.id(), 1, 42).expect("build");
        let out = process(&mut state, &config, "peer", 2000, Event::Ping(ping)).expect("process");
        assert_eq!(out.len(), 2);
        match &out[0].event {
            Event::Ack(ack) => {
                assert_eq!(ack.neighbour_id, sender);
                assert_eq!(ack.ts, 42);
            }
            other => panic!("expected Ack, got {other:?}"),
        }
        assert!(matches!(out[1].event, Event::AntiEntropy(_)));
    }

    #[test]
    fn test_indirect_ping_relay_forwards_unchanged() {
        let mut state = new_state(10);
        let config = SwimConfig::default();
        let ip = IndirectPing::build(
            Uuid::from_bytes([1; 16]),
            0,
            0,
            Uuid::from_bytes([2; 16]),
            1,
            100,
            state.id(),
            "self".into(),
            1000,
            "target-host".into(),
            3000,
        )
        .expect("build");

        let out = process(&mut state, &config, "relay-src", 1, Event::IndirectPing(ip.clone())).expect("process");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].host, "target-host");
        assert_eq!(out[0].port, 3000);
        assert_eq!(out[0].event, Event::IndirectPing(ip));
    }

    #[test]
    fn test_suspect_is_observed_but_not_propagated() {
        let mut state = new_state(10);
        let config = SwimConfig::default();
        let suspect = swim_proto::event::Suspect::build(
            Uuid::from_bytes([1; 16]),
            0,
            0,
            Uuid::from_bytes([2; 16]),
            0,
            0,
        )
        .expect("build");
        let out = process(&mut state, &config, "h", 1, Event::Suspect(suspect)).expect("process");
        assert!(out.is_empty());
    }

    #[test]
    fn test_unknown_event_increments_tx_and_drops() {
        let mut state = new_state(10);
        let config = SwimConfig::default();
        let before = state.tx();
        let out = process(&mut state, &config, "h", 1, Event::Unknown(250)).expect("process");
        assert!(out.is_empty());
        assert_eq!(state.tx(), before + 1);
    }
}
