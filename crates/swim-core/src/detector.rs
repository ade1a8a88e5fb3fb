//! Failure detector: ping/ack timers and suspect/dead escalation.
//!
//! Timers themselves are driven from `lifecycle`'s async tasks
//! (`tokio::time::sleep_until`, one per outstanding ack); this module
//! is the pure decision logic each timer fires into.

use rand::seq::SliceRandom;
use swim_proto::event::{Ack, Dead, Event, IndirectAck, IndirectPing, NodeStatus, Ping};
use uuid::Uuid;

use crate::config::SwimConfig;
use crate::state::{NodeState, PingRecord};
use crate::Result;

/// What the caller must do after a ping/indirect-ping timer fires.
pub enum TimeoutEffect {
    /// Resend a direct ping; the event has already been recorded.
    Retry(Event),
    /// Escalate to indirect ping via `relay_id`; the event has already
    /// been recorded.
    Indirect { relay_id: Uuid, event: Event },
    /// No alive relay remained, or attempts are exhausted: the
    /// neighbour is now `Dead` and `event` should be enqueued/
    /// broadcast.
    MarkedDead(Event),
    /// The key was already cleared (acked or escalated concurrently);
    /// nothing to do.
    Cleared,
}

/// Begin a fresh direct-ping cycle toward `neighbour_id`. Builds the
/// `attempt_number=1` Ping, records it in `ping_events`, and returns
/// the event to send.
pub fn start_ping(state: &mut NodeState, neighbour_id: Uuid, ts: u64) -> Result<Event> {
    let tx = state.inc_tx();
    let event = Ping::build(
        state.id(),
        state.host(),
        state.port(),
        state.restart_counter(),
        tx,
        neighbour_id,
        1,
        ts,
    )?;
    state.ping_events().insert(
        (neighbour_id, ts),
        PingRecord {
            neighbour_id,
            attempt_number: 1,
            ts,
            relay_id: None,
        },
    );
    Ok(Event::Ping(event))
}

/// Handle a direct-ping ack timeout for `(neighbour_id, ts)`.
pub fn on_ping_timeout(
    state: &mut NodeState,
    config: &SwimConfig,
    neighbour_id: Uuid,
    ts: u64,
    now_ts: u64,
) -> Result<TimeoutEffect> {
    let Some(record) = state.ping_events().remove(&(neighbour_id, ts)) else {
        return Ok(TimeoutEffect::Cleared);
    };

    if record.attempt_number < config.max_ping_without_ack_before_suspect {
        let tx = state.inc_tx();
        let next_attempt = record.attempt_number + 1;
        let event = Ping::build(
            state.id(),
            state.host(),
            state.port(),
            state.restart_counter(),
            tx,
            neighbour_id,
            next_attempt,
            now_ts,
        )?;
        state.ping_events().insert(
            (neighbour_id, now_ts),
            PingRecord {
                neighbour_id,
                attempt_number: next_attempt,
                ts: now_ts,
                relay_id: None,
            },
        );
        return Ok(TimeoutEffect::Retry(Event::Ping(event)));
    }

    mark_suspect(state, neighbour_id);

    let relay_candidates: Vec<Uuid> = state
        .alive_neighbour_ids()
        .into_iter()
        .filter(|id| *id != neighbour_id)
        .collect();

    if let Some(relay_id) = choose_relay(&relay_candidates) {
        let next_attempt = record.attempt_number + 1;
        let event = build_indirect_ping(state, relay_id, neighbour_id, next_attempt, now_ts)?;
        state.indirect_ping_events().insert(
            (neighbour_id, now_ts),
            PingRecord {
                neighbour_id,
                attempt_number: next_attempt,
                ts: now_ts,
                relay_id: Some(relay_id),
            },
        );
        return Ok(TimeoutEffect::Indirect {
            relay_id,
            event,
        });
    }

    Ok(TimeoutEffect::MarkedDead(mark_dead(state, neighbour_id)?))
}

/// Handle an indirect-ping ack timeout for `(neighbour_id, ts)`.
pub fn on_indirect_timeout(
    state: &mut NodeState,
    config: &SwimConfig,
    neighbour_id: Uuid,
    ts: u64,
    now_ts: u64,
) -> Result<TimeoutEffect> {
    let Some(record) = state.indirect_ping_events().remove(&(neighbour_id, ts)) else {
        return Ok(TimeoutEffect::Cleared);
    };

    if record.attempt_number < config.max_ping_without_ack_before_dead {
        let relay_candidates: Vec<Uuid> = state
            .alive_neighbour_ids()
            .into_iter()
            .filter(|id| *id != neighbour_id)
            .collect();
        if let Some(relay_id) = choose_relay(&relay_candidates) {
            let next_attempt = record.attempt_number + 1;
            let event = build_indirect_ping(state, relay_id, neighbour_id, next_attempt, now_ts)?;
            state.indirect_ping_events().insert(
                (neighbour_id, now_ts),
                PingRecord {
                    neighbour_id,
                    attempt_number: next_attempt,
                    ts: now_ts,
                    relay_id: Some(relay_id),
                },
            );
            return Ok(TimeoutEffect::Indirect { relay_id, event });
        }
    }

    Ok(TimeoutEffect::MarkedDead(mark_dead(state, neighbour_id)?))
}

/// Clear an outstanding direct-ping record on a fresh Ack and restore
/// `alive` status. Returns `true` if an outstanding record was found
/// (first-ack-wins: a caller seeing `false` should not reprocess a
/// duplicate ack).
pub fn confirm_ping(state: &mut NodeState, neighbour_id: Uuid, ts: u64) -> bool {
    let cleared = state.ping_events().remove(&(neighbour_id, ts)).is_some();
    if cleared {
        restore_alive(state, neighbour_id);
    }
    cleared
}

/// Clear an outstanding indirect-ping record on a fresh IndirectAck.
pub fn confirm_indirect(state: &mut NodeState, neighbour_id: Uuid, ts: u64) -> bool {
    let cleared = state
        .indirect_ping_events()
        .remove(&(neighbour_id, ts))
        .is_some();
    if cleared {
        restore_alive(state, neighbour_id);
    }
    cleared
}

fn mark_suspect(state: &mut NodeState, neighbour_id: Uuid) {
    if let Some(n) = state.neighbours_mut().get_mut(&neighbour_id) {
        n.status = NodeStatus::Suspect;
    }
}

fn restore_alive(state: &mut NodeState, neighbour_id: Uuid) {
    if let Some(n) = state.neighbours_mut().get_mut(&neighbour_id) {
        if n.status == NodeStatus::Suspect {
            n.status = NodeStatus::Alive;
        }
    }
}

fn mark_dead(state: &mut NodeState, neighbour_id: Uuid) -> Result<Event> {
    let (neighbour_restart_counter, neighbour_tx) = state
        .neighbours_mut()
        .get_mut(&neighbour_id)
        .map(|n| {
            n.status = NodeStatus::Dead;
            (n.restart_counter, n.events_tx.values().copied().max().unwrap_or(0))
        })
        .unwrap_or((0, 0));

    let tx = state.inc_tx();
    let event = Dead::build(
        state.id(),
        state.restart_counter(),
        tx,
        neighbour_id,
        neighbour_restart_counter,
        neighbour_tx,
    )?;
    Ok(Event::Dead(event))
}

fn choose_relay(candidates: &[Uuid]) -> Option<Uuid> {
    let mut rng = rand::thread_rng();
    candidates.choose(&mut rng).copied()
}

#[allow(clippy::too_many_arguments)]
fn build_indirect_ping(
    state: &mut NodeState,
    relay_id: Uuid,
    neighbour_id: Uuid,
    attempt_number: u32,
    ts: u64,
) -> Result<Event> {
    let (relay_host, relay_port) = state
        .neighbours()
        .get(&relay_id)
        .map(|n| (n.host.clone(), n.port))
        .unwrap_or_default();
    let (neighbour_host, neighbour_port) = state
        .neighbours()
        .get(&neighbour_id)
        .map(|n| (n.host.clone(), n.port))
        .unwrap_or_default();

    let tx = state.inc_tx();
    let event = IndirectPing::build(
        state.id(),
        state.restart_counter(),
        tx,
        neighbour_id,
        attempt_number,
        ts,
        relay_id,
        relay_host,
        relay_port,
        neighbour_host,
        neighbour_port,
    )?;
    Ok(Event::IndirectPing(event))
}
