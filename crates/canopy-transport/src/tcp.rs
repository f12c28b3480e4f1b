//! TCP transport
//!
//! Frames are self-delimiting: every packet starts with the fixed
//! 20-byte header carrying its own body length, so the reader task
//! reassembles exact packet boundaries from the byte stream without an
//! extra length prefix. One listener feeds a single inbox; outbound
//! streams are opened lazily per destination and reused.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use canopy_wire::{Address, HEADER_LEN};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::transport::Transport;

/// Upper bound on a declared body length. Anything larger is treated as
/// a corrupt stream and the connection is dropped.
const MAX_BODY_LEN: u32 = 64 * 1024;

/// Bound on one connect-and-write; the protocol loop must never hang on
/// a dead peer.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

const INBOX_CAPACITY: usize = 1024;

pub struct TcpTransport {
    local_addr: Address,
    /// Cached outbound streams, keyed by the peer's listening address.
    outbound: DashMap<Address, Arc<Mutex<TcpStream>>>,
    inbox: Mutex<mpsc::Receiver<Bytes>>,
}

impl TcpTransport {
    /// Bind a listener on `addr` and start accepting inbound streams.
    ///
    /// Port 0 binds an ephemeral port; [`Transport::local_addr`] reports
    /// the resolved one.
    pub async fn bind(addr: Address) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr.socket_addr())
            .await
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        let local_addr = match listener.local_addr() {
            Ok(std::net::SocketAddr::V4(v4)) => Address::from(v4),
            _ => addr,
        };

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        tokio::spawn(accept_loop(listener, inbox_tx));

        debug!(local = %local_addr, "listener bound");
        Ok(Self {
            local_addr,
            outbound: DashMap::new(),
            inbox: Mutex::new(inbox_rx),
        })
    }

    async fn send_inner(&self, peer: Address, frame: Bytes) -> Result<(), TransportError> {
        let cached = self.outbound.get(&peer).map(|entry| entry.value().clone());
        let stream = match cached {
            Some(stream) => stream,
            None => {
                let stream = TcpStream::connect(peer.socket_addr()).await.map_err(|e| {
                    TransportError::SendFailed {
                        addr: peer,
                        reason: e.to_string(),
                    }
                })?;
                let stream = Arc::new(Mutex::new(stream));
                self.outbound.insert(peer, stream.clone());
                stream
            }
        };

        let mut guard = stream.lock().await;
        if let Err(e) = guard.write_all(&frame).await {
            drop(guard);
            self.outbound.remove(&peer);
            return Err(TransportError::SendFailed {
                addr: peer,
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> Address {
        self.local_addr
    }

    async fn send(&self, peer: Address, frame: Bytes) -> Result<(), TransportError> {
        match tokio::time::timeout(SEND_TIMEOUT, self.send_inner(peer, frame)).await {
            Ok(result) => result,
            Err(_) => {
                self.outbound.remove(&peer);
                Err(TransportError::SendFailed {
                    addr: peer,
                    reason: "send timed out".into(),
                })
            }
        }
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

async fn accept_loop(listener: TcpListener, inbox_tx: mpsc::Sender<Bytes>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                trace!(remote = %remote, "inbound stream accepted");
                tokio::spawn(read_frames(stream, inbox_tx.clone()));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Read whole frames off one inbound stream until it closes.
async fn read_frames(mut stream: TcpStream, inbox_tx: mpsc::Sender<Bytes>) {
    loop {
        let mut header = [0u8; HEADER_LEN];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let body_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if body_len > MAX_BODY_LEN {
            warn!(body_len, "oversized frame, dropping stream");
            return;
        }

        let mut frame = BytesMut::with_capacity(HEADER_LEN + body_len as usize);
        frame.extend_from_slice(&header);
        frame.resize(HEADER_LEN + body_len as usize, 0);
        if stream.read_exact(&mut frame[HEADER_LEN..]).await.is_err() {
            return;
        }

        if inbox_tx.send(frame.freeze()).await.is_err() {
            // Transport dropped; nothing left to deliver to.
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_wire::{Packet, PacketBody};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn loopback() -> Address {
        Address::new(Ipv4Addr::LOCALHOST, 0)
    }

    #[tokio::test]
    async fn test_send_and_receive_frame() {
        let a = TcpTransport::bind(loopback()).await.unwrap();
        let b = TcpTransport::bind(loopback()).await.unwrap();

        let packet = Packet::new(
            a.local_addr(),
            PacketBody::Message {
                text: "Hello World!".into(),
            },
        );
        a.send(b.local_addr(), packet.encode()).await.unwrap();

        // Give the reader task a moment to reassemble the frame.
        let mut frames = Vec::new();
        for _ in 0..50 {
            frames = b.receive_all().await;
            if !frames.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(frames.len(), 1);
        let received = Packet::decode(&frames[0]).unwrap();
        assert_eq!(received, packet);
    }

    #[tokio::test]
    async fn test_send_to_unreachable_peer_fails() {
        let a = TcpTransport::bind(loopback()).await.unwrap();
        // Nothing listens here.
        let dead: Address = "127.000.000.001:00009".parse().unwrap();

        let packet = Packet::new(a.local_addr(), PacketBody::Join);
        let result = a.send(dead, packet.encode()).await;
        assert!(matches!(result, Err(TransportError::SendFailed { .. })));
    }

    #[tokio::test]
    async fn test_receive_all_is_non_blocking() {
        let a = TcpTransport::bind(loopback()).await.unwrap();
        assert!(a.receive_all().await.is_empty());
    }
}
