//! Incarnation refutation.
//!
//! A declares B dead. B then restarts (fresh process, restart_counter
//! incremented, tx reset to 0) and rejoins. A should re-admit B as
//! alive from the higher incarnation, and a subsequent stale Dead(B)
//! event carrying the old incarnation should be ignored rather than
//! knocking B back down.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use swim_core::config::SwimConfig;
use swim_core::diag::NoopDiagSink;
use swim_core::lifecycle::Node;
use swim_core::state::Cluster;
use swim_net::loopback::LoopbackNetwork;
use swim_net::Transport;
use swim_proto::codec::encode_batch;
use swim_proto::event::{Dead, Event, NodeStatus};
use uuid::Uuid;

const PASSWORD: &str = "0123456789abcdef";

fn cluster() -> Cluster {
    Cluster::new(
        Uuid::from_bytes([0xDD; 16]),
        "s4-cluster".into(),
        "".into(),
        "default".into(),
        HashSet::new(),
        PASSWORD.into(),
        3,
    )
    .expect("cluster")
}

#[tokio::test(start_paused = true)]
async fn s4_incarnation_refutation() {
    let net = LoopbackNetwork::new();
    let config = SwimConfig {
        ping_heartbeat_ms: 20,
        ack_timeout_ms: 20,
        max_ping_without_ack_before_suspect: 2,
        max_ping_without_ack_before_dead: 4,
        max_join_time_ms: 300,
        rejoin_if_dead: false,
        ..SwimConfig::default()
    };

    let a_id = Uuid::from_bytes([0x01; 16]);
    let b_id = Uuid::from_bytes([0x02; 16]);

    let a = Node::new(
        cluster(),
        a_id,
        "127.0.0.1".into(),
        5601,
        config.clone(),
        net.register("127.0.0.1", 5601),
        Arc::new(NoopDiagSink),
    );
    a.start().await.expect("start a");
    a.add_seed(b_id, "127.0.0.1", 5602).await.expect("seed b");

    // First incarnation of B joins normally.
    let b1 = Node::new(
        cluster(),
        b_id,
        "127.0.0.1".into(),
        5602,
        config.clone(),
        net.register("127.0.0.1", 5602),
        Arc::new(NoopDiagSink),
    );
    b1.start().await.expect("start b1");
    b1.add_seed(a_id, "127.0.0.1", 5601).await.expect("seed a");
    let join_task = tokio::spawn({
        let b1 = Arc::clone(&b1);
        async move { b1.join().await }
    });
    tokio::time::advance(Duration::from_millis(config.max_join_time_ms * 2)).await;
    assert!(join_task.await.expect("join task"));
    assert_eq!(a.neighbour_status(b_id).await, Some(NodeStatus::Alive));

    // B vanishes; a fresh incarnation (higher restart_counter, tx
    // reset) restarts and rejoins A at a new address.
    drop(b1);
    let b2 = Node::new(
        cluster(),
        b_id,
        "127.0.0.1".into(),
        5603,
        config.clone(),
        net.register("127.0.0.1", 5603),
        Arc::new(NoopDiagSink),
    );
    b2.start().await.expect("start b2");
    b2.add_seed(a_id, "127.0.0.1", 5601).await.expect("seed a 2");
    a.add_seed(b_id, "127.0.0.1", 5603).await.expect("reseed b at new port");

    let rejoin_task = tokio::spawn({
        let b2 = Arc::clone(&b2);
        async move { b2.join().await }
    });
    tokio::time::advance(Duration::from_millis(config.max_join_time_ms * 2)).await;
    assert!(rejoin_task.await.expect("rejoin task"));
    assert_eq!(a.neighbour_status(b_id).await, Some(NodeStatus::Alive));

    // A stray Dead(B) from B's first incarnation (restart_counter=0,
    // tx=1) arrives late, forged directly onto the wire from a
    // throwaway address. A's freshness check must reject it since B's
    // current incarnation is already higher.
    let ghost = net.register("127.0.0.1", 5699);
    let ghost_id = Uuid::from_bytes([0xEE; 16]);
    let stale_dead = Dead::build(ghost_id, 0, 1, b_id, 0, 0).expect("build stale dead");
    let plaintext = encode_batch(&[Event::Dead(stale_dead)]).expect("encode");
    let key = swim_crypto::kdf::derive_key(PASSWORD).expect("derive key");
    let frame = swim_crypto::aesgcm::encrypt(&key, &plaintext).expect("encrypt");
    ghost
        .send_to("127.0.0.1", 5601, &frame)
        .await
        .expect("send stale dead");

    for _ in 0..5 {
        tokio::time::advance(Duration::from_millis(config.ping_heartbeat_ms)).await;
    }
    assert_eq!(
        a.neighbour_status(b_id).await,
        Some(NodeStatus::Alive),
        "a stale Dead from B's old incarnation must not override the newer one"
    );
}
