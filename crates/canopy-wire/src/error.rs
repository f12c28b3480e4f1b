//! Error types for the wire codec

use thiserror::Error;

/// Errors produced while decoding a packet from raw bytes.
///
/// A malformed packet is dropped by the dispatch loop; decoding never
/// panics on attacker-controlled input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("Truncated header: need 20 bytes, have {0}")]
    TruncatedHeader(usize),

    #[error("Truncated body: declared {declared} bytes, have {available}")]
    TruncatedBody { declared: usize, available: usize },

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("Unknown packet type: {0}")]
    UnknownType(u16),

    #[error("Invalid IP octet in header: {0}")]
    InvalidIpOctet(u16),

    #[error("Invalid port in header: {0}")]
    InvalidPort(u32),

    #[error("Body is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid address text: {0}")]
    InvalidAddress(String),

    #[error("Malformed {0} body")]
    MalformedBody(&'static str),

    #[error("Reunion entry count {declared} does not match body length {body_len}")]
    EntryCountMismatch { declared: usize, body_len: usize },
}
