//! # swim-net
//!
//! Datagram transport for the SWIM membership protocol.
//!
//! The protocol logic in `swim-core` only needs to send and receive raw
//! byte frames to/from `host:port` pairs — it has no opinion on whether
//! those frames travel over a real UDP socket or an in-memory channel.
//! [`Transport`] is that seam: [`udp`] provides the real implementation,
//! [`loopback`] provides an in-process one for deterministic tests.

pub mod loopback;
pub mod transport;
pub mod udp;

pub use transport::Transport;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The local socket could not be bound.
    #[error("bind error: {0}")]
    Bind(String),

    /// A send operation failed.
    #[error("send error: {0}")]
    Send(String),

    /// A receive operation failed.
    #[error("receive error: {0}")]
    Receive(String),

    /// A host:port pair did not resolve to a usable socket address.
    #[error("address resolution error: {0}")]
    Resolve(String),

    /// A received datagram exceeded the configured maximum size.
    #[error("datagram of {len} bytes exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::TooLarge { len: 2000, max: 1500 };
        assert_eq!(
            err.to_string(),
            "datagram of 2000 bytes exceeds maximum 1500"
        );
        assert_eq!(TransportError::Closed.to_string(), "transport closed");
    }
}
