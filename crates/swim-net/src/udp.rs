//! Real UDP datagram transport. Any reliable or unreliable datagram
//! transport is a valid substrate for this protocol; UDP is the
//! concrete choice used here.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::net::lookup_host;

use crate::transport::{Transport, MAX_DATAGRAM_SIZE};
use crate::{Result, TransportError};

/// A UDP-backed [`Transport`].
///
/// Wraps a single bound [`UdpSocket`]; every node acts as both sender
/// and receiver on the same socket, mirroring how `QuicNode` combines
/// client and server roles on one endpoint.
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind a new UDP transport to the given local address.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the socket cannot be bound.
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransportError::Bind(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::Bind(e.to_string()))?;

        tracing::info!(%local_addr, "UDP transport bound");

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }
}

impl Transport for UdpTransport {
    async fn send_to(&self, host: &str, port: u16, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::TooLarge {
                len: frame.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let mut addrs = lookup_host((host, port))
            .await
            .map_err(|e| TransportError::Resolve(e.to_string()))?;
        let addr = addrs
            .next()
            .ok_or_else(|| TransportError::Resolve(format!("no address for {host}:{port}")))?;

        self.socket
            .send_to(frame, addr)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<(Vec<u8>, String, u16)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| TransportError::Receive(e.to_string()))?;
        buf.truncate(len);
        Ok((buf, from.ip().to_string(), from.port()))
    }

    fn local_addr(&self) -> Result<(String, u16)> {
        Ok((self.local_addr.ip().to_string(), self.local_addr.port()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_and_send_receive_roundtrip() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind a");
        let b = UdpTransport::bind("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind b");

        let (b_host, b_port) = b.local_addr().expect("local addr");
        a.send_to(&b_host, b_port, b"hello").await.expect("send");

        let (frame, from_host, _from_port) = b.recv_from().await.expect("recv");
        assert_eq!(frame, b"hello");
        assert_eq!(from_host, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind a");
        let (host, port) = a.local_addr().expect("local addr");
        let oversized = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        let result = a.send_to(&host, port, &oversized).await;
        assert!(matches!(result, Err(TransportError::TooLarge { .. })));
    }
}
