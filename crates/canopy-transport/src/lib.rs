//! # Canopy Transport
//!
//! Byte movement for the overlay: the [`Transport`] trait, a framed
//! TCP implementation, an in-memory channel network for tests, and the
//! [`ConnectionTable`] of per-peer outbound buffers the protocol loop
//! flushes once per tick.

pub mod channel;
pub mod connection;
pub mod error;
pub mod tcp;
pub mod transport;

pub use channel::{ChannelNetwork, ChannelTransport};
pub use connection::{Connection, ConnectionTable};
pub use error::TransportError;
pub use tcp::TcpTransport;
pub use transport::Transport;
