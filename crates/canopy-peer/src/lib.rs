//! # Canopy Peer
//!
//! The protocol engine: one [`Peer`] per process, parameterized over a
//! [`Transport`](canopy_transport::Transport). The role (root or
//! non-root) is chosen once at construction and selects the packet
//! handler; the main loop drains inbound frames, dispatches them,
//! applies operator commands, and flushes the outbound buffers on a
//! fixed tick, while an independent reunion timer drives the liveness
//! protocol.

pub mod bridge;
pub mod config;
pub mod error;
pub mod handler;
pub mod leaf;
pub mod peer;
pub mod root;

pub use bridge::{Command, DisplayEvent, parse_line};
pub use config::PeerConfig;
pub use error::PeerError;
pub use leaf::{LeafHandler, ReunionMode};
pub use peer::Peer;
pub use root::RootHandler;
