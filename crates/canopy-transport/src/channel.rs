//! In-memory transport for testing
//!
//! A [`ChannelNetwork`] is a shared registry of mailboxes. Endpoints
//! created from the same network deliver frames to each other over
//! bounded channels, and [`ChannelNetwork::disconnect`] simulates a
//! peer crash by removing its mailbox so sends to it start failing.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use canopy_wire::Address;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};

use crate::error::TransportError;
use crate::transport::Transport;

const MAILBOX_CAPACITY: usize = 256;

/// Shared mailbox registry for a simulated network.
#[derive(Clone, Default)]
pub struct ChannelNetwork {
    mailboxes: Arc<DashMap<Address, mpsc::Sender<Bytes>>>,
}

impl ChannelNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the network at `addr`, returning the endpoint for it.
    pub fn endpoint(&self, addr: Address) -> ChannelTransport {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.mailboxes.insert(addr, tx);
        ChannelTransport {
            local_addr: addr,
            mailboxes: self.mailboxes.clone(),
            inbox: Mutex::new(rx),
        }
    }

    /// Remove a peer's mailbox. Frames already delivered stay readable
    /// on its endpoint; new sends to it fail.
    pub fn disconnect(&self, addr: Address) {
        self.mailboxes.remove(&addr);
    }
}

pub struct ChannelTransport {
    local_addr: Address,
    mailboxes: Arc<DashMap<Address, mpsc::Sender<Bytes>>>,
    inbox: Mutex<mpsc::Receiver<Bytes>>,
}

#[async_trait]
impl Transport for ChannelTransport {
    fn local_addr(&self) -> Address {
        self.local_addr
    }

    async fn send(&self, peer: Address, frame: Bytes) -> Result<(), TransportError> {
        let mailbox = self
            .mailboxes
            .get(&peer)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::SendFailed {
                addr: peer,
                reason: "peer not on network".into(),
            })?;
        mailbox
            .send(frame)
            .await
            .map_err(|_| TransportError::SendFailed {
                addr: peer,
                reason: "mailbox closed".into(),
            })
    }

    async fn receive_all(&self) -> Vec<Bytes> {
        let mut inbox = self.inbox.lock().await;
        let mut frames = Vec::new();
        while let Ok(frame) = inbox.try_recv() {
            frames.push(frame);
        }
        frames
    }
}
