//! The outgoing-events FIFO and anti-entropy snapshot builder.

use std::collections::{HashMap, VecDeque};

use rand::seq::SliceRandom;
use swim_proto::event::{AntiEntropyEntry, Event};
use uuid::Uuid;

use crate::neighbour::NeighbourTable;

/// Ordered FIFO of events awaiting piggyback on the next outgoing
/// datagram.
#[derive(Default)]
pub struct OutgoingQueue {
    events: VecDeque<Event>,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn put_event(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Remove and return up to `n` events from the head, de-duplicated
    /// by `(id, code)` collapsing to the latest incarnation
    /// `(restart_counter, tx)` seen among the drained batch. On an
    /// empty queue this returns `vec![]` and leaves the queue
    /// untouched, regardless of `n`.
    pub fn take_events(&mut self, n: usize) -> Vec<Event> {
        if self.events.is_empty() {
            return Vec::new();
        }

        let take = n.min(self.events.len());
        let drained: Vec<Event> = self.events.drain(..take).collect();

        let mut latest: HashMap<(Option<Uuid>, u8), (usize, (u64, u64))> = HashMap::new();
        for (idx, event) in drained.iter().enumerate() {
            let key = (event.sender_id(), event.code());
            let incarnation = event.sender_incarnation().unwrap_or((0, 0));
            match latest.get(&key) {
                Some((_, existing)) if *existing >= incarnation => {}
                _ => {
                    latest.insert(key, (idx, incarnation));
                }
            }
        }

        let mut keep_idx: Vec<usize> = latest.values().map(|(idx, _)| *idx).collect();
        keep_idx.sort_unstable();

        let mut out = Vec::with_capacity(keep_idx.len());
        let mut keep_iter = keep_idx.into_iter().peekable();
        for (idx, event) in drained.into_iter().enumerate() {
            if keep_iter.peek() == Some(&idx) {
                keep_iter.next();
                out.push(event);
            }
        }
        out
    }
}

/// Build an anti-entropy snapshot from the neighbour table: up to
/// `max_items` random neighbour tuples, or the single tuple for
/// `target` when given.
pub fn anti_entropy_snapshot(
    neighbours: &NeighbourTable,
    max_items: usize,
    target: Option<Uuid>,
) -> Vec<AntiEntropyEntry> {
    if let Some(id) = target {
        return neighbours
            .get(&id)
            .map(|n| vec![to_entry(n)])
            .unwrap_or_default();
    }

    let mut rng = rand::thread_rng();
    let all: Vec<_> = neighbours.values().collect();
    all.choose_multiple(&mut rng, max_items.min(all.len()))
        .map(|n| to_entry(n))
        .collect::<Vec<_>>()
}

fn to_entry(n: &crate::neighbour::NeighbourNode) -> AntiEntropyEntry {
    AntiEntropyEntry {
        id: n.id,
        host: n.host.clone(),
        port: n.port,
        status: n.status,
        access: n.access,
        restart_counter: n.restart_counter,
        events_tx: n.events_tx.iter().map(|(&code, &tx)| (code, tx)).collect(),
        payload: n.payload.clone(),
    }
}
