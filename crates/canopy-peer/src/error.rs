//! Error types for the protocol engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Wire(#[from] canopy_wire::WireError),

    #[error(transparent)]
    Transport(#[from] canopy_transport::TransportError),

    #[error(transparent)]
    Topology(#[from] canopy_topology::TopologyError),

    #[error("Lost contact with the root")]
    Disconnected,
}
