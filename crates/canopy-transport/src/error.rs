//! Error types for the transport layer

use canopy_wire::Address;
use thiserror::Error;

/// Errors from sending, receiving and connection bookkeeping.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind listener on {addr}: {source}")]
    BindFailed {
        addr: Address,
        source: std::io::Error,
    },

    #[error("No connection for address: {0}")]
    NoSuchConnection(Address),

    #[error("Send to {addr} failed: {reason}")]
    SendFailed { addr: Address, reason: String },

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}
