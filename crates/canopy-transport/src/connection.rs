//! Per-peer outbound buffering
//!
//! The protocol loop never sends inline: handlers enqueue frames on a
//! [`Connection`] and the loop flushes every buffer once per tick. A
//! register connection is the permanent administrative link a non-root
//! peer keeps to the root; it never takes Message flood traffic, so a
//! peer may hold two connections to the same address.

use bytes::Bytes;
use canopy_wire::Address;
use tracing::warn;

use crate::error::TransportError;
use crate::transport::Transport;

#[derive(Debug)]
pub struct Connection {
    pub address: Address,
    pub is_register: bool,
    out_buf: Vec<Bytes>,
}

/// All of a peer's connections, keyed by (address, register flag).
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: Vec<Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, addr: Address, is_register: bool) -> bool {
        self.connections
            .iter()
            .any(|c| c.address == addr && c.is_register == is_register)
    }

    pub fn contains_peer(&self, addr: Address) -> bool {
        self.connections.iter().any(|c| c.address == addr)
    }

    /// Add a connection. Idempotent: an existing (address, register)
    /// entry is kept as-is, buffered frames included.
    pub fn add(&mut self, addr: Address, is_register: bool) {
        if !self.contains(addr, is_register) {
            self.connections.push(Connection {
                address: addr,
                is_register,
                out_buf: Vec::new(),
            });
        }
    }

    pub fn remove(&mut self, addr: Address, is_register: bool) {
        self.connections
            .retain(|c| !(c.address == addr && c.is_register == is_register));
    }

    /// Drop every connection to `addr`, register link included.
    pub fn remove_peer(&mut self, addr: Address) {
        self.connections.retain(|c| c.address != addr);
    }

    /// Buffer a frame for the next flush.
    pub fn enqueue(
        &mut self,
        addr: Address,
        frame: Bytes,
        is_register: bool,
    ) -> Result<(), TransportError> {
        let conn = self
            .connections
            .iter_mut()
            .find(|c| c.address == addr && c.is_register == is_register)
            .ok_or(TransportError::NoSuchConnection(addr))?;
        conn.out_buf.push(frame);
        Ok(())
    }

    /// Addresses eligible for Message flooding: every non-register
    /// connection except the sender's.
    pub fn broadcast_targets(&self, exclude: Address) -> Vec<Address> {
        let mut targets = Vec::new();
        for conn in &self.connections {
            if !conn.is_register && conn.address != exclude && !targets.contains(&conn.address) {
                targets.push(conn.address);
            }
        }
        targets
    }

    /// Send every buffered frame, in enqueue order per connection.
    ///
    /// A connection whose send fails is removed (all entries for that
    /// address) and its address is reported; remaining frames for it
    /// are discarded.
    pub async fn flush_all<T: Transport + ?Sized>(&mut self, transport: &T) -> Vec<Address> {
        let mut failed: Vec<Address> = Vec::new();
        for conn in &mut self.connections {
            if failed.contains(&conn.address) {
                conn.out_buf.clear();
                continue;
            }
            let pending = std::mem::take(&mut conn.out_buf);
            for frame in pending {
                if let Err(e) = transport.send(conn.address, frame).await {
                    warn!(peer = %conn.address, error = %e, "send failed, dropping connection");
                    failed.push(conn.address);
                    break;
                }
            }
        }
        self.connections.retain(|c| !failed.contains(&c.address));
        failed
    }
}
