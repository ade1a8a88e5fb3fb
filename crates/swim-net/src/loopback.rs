//! In-memory loopback transport for deterministic tests.
//!
//! Mirrors the testability pattern of a transport trait implemented
//! against fakes rather than real sockets: a [`LoopbackNetwork`] is a
//! shared registry of mailboxes, and each [`LoopbackTransport`] is one
//! node's handle into it. No real I/O, so tests can run under
//! `tokio::time::pause()` without any socket-level nondeterminism.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::transport::{Transport, MAX_DATAGRAM_SIZE};
use crate::{Result, TransportError};

type Addr = (String, u16);
type Mailbox = mpsc::UnboundedSender<(Vec<u8>, String, u16)>;

/// Shared registry of in-memory "nodes" reachable by host:port.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    mailboxes: Arc<Mutex<HashMap<Addr, Mailbox>>>,
    blocked: Arc<Mutex<HashSet<(Addr, Addr)>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new node at `host:port` and return its transport
    /// handle. Panics if the address is already registered, since two
    /// nodes sharing an address is a test bug, not a runtime case.
    pub fn register(&self, host: &str, port: u16) -> LoopbackTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut mailboxes = self.mailboxes.lock().expect("mailbox lock poisoned");
        let addr = (host.to_string(), port);
        if mailboxes.insert(addr.clone(), tx).is_some() {
            panic!("loopback address {host}:{port} already registered");
        }
        LoopbackTransport {
            network: self.clone(),
            host: host.to_string(),
            port,
            inbox: Arc::new(Mutex::new(rx)),
        }
    }

    /// Cut direct delivery between two addresses in both directions,
    /// modeling a network partition between exactly that pair while
    /// every other route stays up. Frames sent between them are
    /// silently dropped, as a real partition drops packets rather than
    /// erroring the sender.
    pub fn partition(&self, a: (&str, u16), b: (&str, u16)) {
        let a = (a.0.to_string(), a.1);
        let b = (b.0.to_string(), b.1);
        let mut blocked = self.blocked.lock().expect("blocked lock poisoned");
        blocked.insert((a.clone(), b.clone()));
        blocked.insert((b, a));
    }

    fn is_blocked(&self, from: &Addr, to: &Addr) -> bool {
        let blocked = self.blocked.lock().expect("blocked lock poisoned");
        blocked.contains(&(from.clone(), to.clone()))
    }
}

/// One node's handle into a [`LoopbackNetwork`].
#[derive(Clone)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    host: String,
    port: u16,
    inbox: Arc<Mutex<mpsc::UnboundedReceiver<(Vec<u8>, String, u16)>>>,
}

impl Transport for LoopbackTransport {
    async fn send_to(&self, host: &str, port: u16, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::TooLarge {
                len: frame.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let from = (self.host.clone(), self.port);
        let to = (host.to_string(), port);
        if self.network.is_blocked(&from, &to) {
            return Ok(());
        }

        let sender = {
            let mailboxes = self.network.mailboxes.lock().expect("mailbox lock poisoned");
            mailboxes.get(&to).cloned()
        };

        match sender {
            Some(tx) => tx
                .send((frame.to_vec(), self.host.clone(), self.port))
                .map_err(|_| TransportError::Send(format!("{host}:{port} is gone"))),
            None => Err(TransportError::Send(format!("no such node {host}:{port}"))),
        }
    }

    async fn recv_from(&self) -> Result<(Vec<u8>, String, u16)> {
        let mut inbox = self.inbox.lock().expect("inbox lock poisoned");
        inbox.recv().await.ok_or(TransportError::Closed)
    }

    fn local_addr(&self) -> Result<(String, u16)> {
        Ok((self.host.clone(), self.port))
    }
}
