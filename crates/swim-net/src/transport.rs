//! The transport seam between protocol logic and the network.

use std::future::Future;

use crate::Result;

/// Maximum UDP datagram payload size this crate will send or accept.
///
/// Chosen to stay well under the common 1500-byte Ethernet MTU once IP
/// and UDP headers are subtracted, avoiding IP fragmentation.
pub const MAX_DATAGRAM_SIZE: usize = 1432;

/// Abstraction over "send a byte frame to host:port" / "receive the
/// next byte frame and who it came from".
///
/// Protocol code in `swim-core` is generic over `T: Transport`, so it
/// can run against [`crate::udp::UdpTransport`] in production and
/// [`crate::loopback::LoopbackTransport`] in tests without real
/// sockets or timing nondeterminism.
pub trait Transport: Send + Sync {
    /// Send a single datagram frame to the given peer.
    fn send_to(
        &self,
        host: &str,
        port: u16,
        frame: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next datagram frame, along with the sender's
    /// host:port as reported by the transport.
    fn recv_from(&self) -> impl Future<Output = Result<(Vec<u8>, String, u16)>> + Send;

    /// The local address this transport is bound to.
    fn local_addr(&self) -> Result<(String, u16)>;
}
