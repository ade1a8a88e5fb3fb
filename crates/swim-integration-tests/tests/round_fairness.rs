//! Round fairness.
//!
//! Over any window of `⌈cluster_size / round_size⌉` heartbeats, every
//! alive neighbour is pinged at least once. `RoundPlanner`'s own
//! no-starvation property is unit-tested in `swim-core`; this exercises
//! the same guarantee end to end through a live `Node`'s heartbeat
//! loop and four real neighbours.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use swim_core::config::SwimConfig;
use swim_core::diag::{DiagRecord, DiagSink};
use swim_core::lifecycle::Node;
use swim_core::state::Cluster;
use swim_net::loopback::LoopbackNetwork;
use swim_proto::CODE_PING;
use uuid::Uuid;

fn cluster() -> Cluster {
    Cluster::new(
        Uuid::from_bytes([0x77; 16]),
        "fairness-cluster".into(),
        "".into(),
        "default".into(),
        HashSet::new(),
        "0123456789abcdef".into(),
        5,
    )
    .expect("cluster")
}

#[derive(Default)]
struct PingSink {
    saw_ping: Mutex<bool>,
}

impl DiagSink for PingSink {
    fn record(&self, rec: DiagRecord) {
        if rec.cmd == "event_received" {
            if let Some(code) = rec.data.get("code").and_then(|v| v.as_u64()) {
                if code as u8 == CODE_PING {
                    *self.saw_ping.lock().expect("lock") = true;
                }
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn round_fairness_every_neighbour_pinged_within_window() {
    let net = LoopbackNetwork::new();
    let config = SwimConfig {
        ping_heartbeat_ms: 20,
        ack_timeout_ms: 200,
        max_ping_without_ack_before_suspect: 100,
        max_ping_without_ack_before_dead: 200,
        ..SwimConfig::default()
    };

    let a_id = Uuid::from_bytes([0x01; 16]);
    let a = Node::new(
        cluster(),
        a_id,
        "127.0.0.1".into(),
        5901,
        config.clone(),
        net.register("127.0.0.1", 5901),
        Arc::new(swim_core::diag::NoopDiagSink),
    );
    a.start().await.expect("start a");

    let mut sinks = Vec::new();
    for (i, port) in (5902..5906).enumerate() {
        let id = Uuid::from_bytes([0x10 + i as u8; 16]);
        let sink = Arc::new(PingSink::default());
        let node = Node::new(
            cluster(),
            id,
            "127.0.0.1".into(),
            port,
            config.clone(),
            net.register("127.0.0.1", port),
            sink.clone(),
        );
        node.start().await.expect("start neighbour");
        a.add_seed(id, "127.0.0.1", port).await.expect("seed");
        sinks.push((id, sink, node));
    }

    // round_size(5) = floor(log2(5)) = 2; window = ceil(5/2) = 3.
    let round_size = 2usize;
    let window_rounds = (5 + round_size - 1) / round_size;
    let step = Duration::from_millis(config.ping_heartbeat_ms);

    for _ in 0..window_rounds {
        tokio::time::advance(step).await;
    }
    // One extra round of slack for scheduling/ack round-trip latency.
    tokio::time::advance(step).await;

    for (id, sink, _node) in &sinks {
        assert!(
            *sink.saw_ping.lock().expect("lock"),
            "neighbour {id} should have been pinged within the fairness window"
        );
    }
}
