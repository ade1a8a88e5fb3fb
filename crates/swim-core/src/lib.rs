//! # swim-core
//!
//! The membership state machine, failure detector, dissemination
//! pipeline, and lifecycle driver for a SWIM-style gossip cluster.
//!
//! - [`config`] — `SwimConfig`, the tunables table
//! - [`diag`] — the diagnostic-tap trait contract
//! - [`state`] — `Cluster` and `NodeState`, the single mutation authority
//! - [`neighbour`] — `NeighbourTable` lookups, upserts, freshness checks
//! - [`dissemination`] — the outgoing-event FIFO and anti-entropy builder
//! - [`round`] — the ping round planner
//! - [`detector`] — the failure-detection timers and escalation rules
//! - [`processor`] — the per-event state transition dispatcher
//! - [`lifecycle`] — `Node`: start/join/leave/stop and the async drivers

pub mod config;
pub mod detector;
pub mod diag;
pub mod dissemination;
pub mod lifecycle;
pub mod neighbour;
pub mod processor;
pub mod round;
pub mod state;

/// Error types for core operations, one variant per kind in /// taxonomy, with `#[from]` wiring across the crates this one composes.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Structural / spec violation of an event or a state update.
    #[error("validation error: {0}")]
    Validation(String),

    /// Attempt to add a neighbour beyond `cluster_size`.
    #[error("cluster size exceeded: {nodes_in_cluster} nodes, limit {cluster_size}")]
    ClusterSizeExceeded {
        nodes_in_cluster: u32,
        cluster_size: u32,
    },

    /// Addressed id not in the neighbour table.
    #[error("unknown neighbour: {0}")]
    UnknownNeighbour(uuid::Uuid),

    /// Payload bytes exceed `max_payload_size`.
    #[error("oversized payload: {len} bytes exceeds maximum {max}")]
    OversizedPayload { len: usize, max: usize },

    /// Outgoing frame exceeds `max_udp_size`.
    #[error("oversized frame: {len} bytes exceeds maximum {max}")]
    OversizedFrame { len: usize, max: usize },

    /// An ack or join-await expired.
    #[error("timeout")]
    Timeout,

    /// Transport bind/send/receive failure.
    #[error("transport error: {0}")]
    Transport(#[from] swim_net::TransportError),

    /// Cryptographic frame error.
    #[error("crypto error: {0}")]
    Crypto(#[from] swim_crypto::CryptoError),

    /// Wire codec or event-model error.
    #[error("protocol error: {0}")]
    Proto(#[from] swim_proto::ProtoError),

    /// Failed to bind the transport at startup.
    #[error("start error: {0}")]
    Start(String),
}

/// Convenience result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::ClusterSizeExceeded {
            nodes_in_cluster: 3,
            cluster_size: 2,
        };
        assert!(err.to_string().contains("3 nodes"));
        assert!(err.to_string().contains("limit 2"));
    }

    #[test]
    fn test_from_conversions() {
        let crypto_err = swim_crypto::CryptoError::BadFrame("x");
        let core_err: CoreError = crypto_err.into();
        assert!(matches!(core_err, CoreError::Crypto(_)));

        let proto_err = swim_proto::ProtoError::Validation("x".into());
        let core_err: CoreError = proto_err.into();
        assert!(matches!(core_err, CoreError::Proto(_)));
    }
}
