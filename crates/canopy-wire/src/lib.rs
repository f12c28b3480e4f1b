//! # Canopy Wire
//!
//! Packet codec for the Canopy overlay network.
//!
//! Every packet is a fixed 20-byte big-endian header followed by a UTF-8
//! body whose layout depends on the packet type. Addresses travel in a
//! fixed-width text form (15-character zero-padded dotted-decimal IP,
//! 5-digit zero-padded port) so that body offsets are always known.
//!
//! ## Key Types
//!
//! - [`Address`]: canonical peer identity (IPv4 + port)
//! - [`Packet`]: a decoded packet with typed body
//! - [`PacketBody`]: the request/response shapes for each packet type
//! - [`WireError`]: decode failures

pub mod address;
pub mod error;
pub mod packet;

pub use address::*;
pub use error::*;
pub use packet::*;
