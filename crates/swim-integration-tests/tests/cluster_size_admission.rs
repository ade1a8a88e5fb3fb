//! Cluster-size admission.
//!
//! cluster_size=2 with A and B already mutually alive. C attempts to
//! join through A. A should refuse admission with a DeadEvent(C) and
//! never insert C into its neighbour table, so `nodes_in_cluster(A)`
//! stays at 2.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use swim_core::config::SwimConfig;
use swim_core::diag::NoopDiagSink;
use swim_core::lifecycle::Node;
use swim_core::state::Cluster;
use swim_net::loopback::LoopbackNetwork;
use swim_proto::event::NodeStatus;
use uuid::Uuid;

fn cluster() -> Cluster {
    Cluster::new(
        Uuid::from_bytes([0xEE; 16]),
        "s5-cluster".into(),
        "".into(),
        "default".into(),
        HashSet::new(),
        "0123456789abcdef".into(),
        2,
    )
    .expect("cluster")
}

#[tokio::test(start_paused = true)]
async fn s5_cluster_size_admission() {
    let net = LoopbackNetwork::new();
    let config = SwimConfig {
        max_join_time_ms: 300,
        ping_heartbeat_ms: 50,
        ack_timeout_ms: 50,
        ..SwimConfig::default()
    };

    let a_id = Uuid::from_bytes([0x01; 16]);
    let b_id = Uuid::from_bytes([0x02; 16]);
    let c_id = Uuid::from_bytes([0x03; 16]);

    let a = Node::new(
        cluster(),
        a_id,
        "127.0.0.1".into(),
        5701,
        config.clone(),
        net.register("127.0.0.1", 5701),
        Arc::new(NoopDiagSink),
    );
    a.start().await.expect("start a");
    a.add_seed(b_id, "127.0.0.1", 5702).await.expect("seed b");

    let b = Node::new(
        cluster(),
        b_id,
        "127.0.0.1".into(),
        5702,
        config.clone(),
        net.register("127.0.0.1", 5702),
        Arc::new(NoopDiagSink),
    );
    b.start().await.expect("start b");

    let join_task = tokio::spawn({
        let b = Arc::clone(&b);
        async move { b.join().await }
    });
    tokio::time::advance(Duration::from_millis(config.max_join_time_ms * 2)).await;
    assert!(join_task.await.expect("join task"));
    assert_eq!(a.neighbour_status(b_id).await, Some(NodeStatus::Alive));
    assert_eq!(a.neighbour_ids().await.len(), 1);

    // C now tries to join through A, but the cluster is already full.
    let c = Node::new(
        cluster(),
        c_id,
        "127.0.0.1".into(),
        5703,
        config.clone(),
        net.register("127.0.0.1", 5703),
        Arc::new(NoopDiagSink),
    );
    c.start().await.expect("start c");
    c.add_seed(a_id, "127.0.0.1", 5701).await.expect("seed a");

    let c_join = tokio::spawn({
        let c = Arc::clone(&c);
        async move { c.join().await }
    });
    tokio::time::advance(Duration::from_millis(config.max_join_time_ms * 2)).await;
    assert!(!c_join.await.expect("c join task"), "C must not be admitted once A is full");

    assert_eq!(a.neighbour_ids().await.len(), 1, "A's table must not grow past cluster_size");
    assert!(!a.neighbour_ids().await.contains(&c_id));
}
