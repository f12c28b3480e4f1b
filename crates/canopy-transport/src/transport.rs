//! Transport abstraction for framed packet exchange
//!
//! The [`Transport`] trait lets the protocol loop work with both real
//! TCP ([`TcpTransport`](crate::tcp::TcpTransport)) and in-memory
//! channels ([`ChannelTransport`](crate::channel::ChannelTransport))
//! for testing. A transport moves whole frames: one encoded packet per
//! send, framing preserved on the wire.

use async_trait::async_trait;
use bytes::Bytes;
use canopy_wire::Address;

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send + Sync {
    /// The address remote peers reach this process at.
    fn local_addr(&self) -> Address;

    /// Send one frame to a peer's listening address.
    ///
    /// # Errors
    ///
    /// Returns an error when the peer is unreachable or the underlying
    /// stream breaks mid-write. The caller treats any error as a failed
    /// connection, never as a retryable condition.
    async fn send(&self, peer: Address, frame: Bytes) -> Result<(), TransportError>;

    /// Drain every frame received since the last call.
    ///
    /// Never blocks: an empty inbox yields an empty vec.
    async fn receive_all(&self) -> Vec<Bytes>;
}
