//! Fixed-width peer addresses
//!
//! An [`Address`] is the canonical identity of a peer: an IPv4 address and
//! a TCP port. On the wire (and inside packet bodies) addresses use fixed
//! widths so that field offsets never move: a 15-character dotted-decimal
//! IP with zero-padded octets (`192.168.000.001`) and a 5-digit
//! zero-padded port (`05000`). Equality and hashing always compare the
//! parsed numeric values, so the padded and unpadded spellings of the same
//! address are equal.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use crate::error::WireError;

/// Width of the fixed dotted-decimal IP form.
pub const IP_TEXT_LEN: usize = 15;
/// Width of the fixed port form.
pub const PORT_TEXT_LEN: usize = 5;
/// Width of one IP + port entry in a Reunion body.
pub const ENTRY_TEXT_LEN: usize = IP_TEXT_LEN + PORT_TEXT_LEN;

/// Canonical peer identity: IPv4 address and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    ip: Ipv4Addr,
    port: u16,
}

impl Address {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parse the fixed-width (or unpadded) text forms of an IP and port.
    ///
    /// Accepts `"192.168.000.001"` / `"05000"` as well as the unpadded
    /// `"192.168.0.1"` / `"5000"`.
    pub fn parse(ip: &str, port: &str) -> Result<Self, WireError> {
        let mut octets = [0u8; 4];
        let mut parts = ip.split('.');
        for slot in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| WireError::InvalidAddress(ip.to_string()))?;
            *slot = part
                .parse::<u8>()
                .map_err(|_| WireError::InvalidAddress(ip.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(WireError::InvalidAddress(ip.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| WireError::InvalidAddress(port.to_string()))?;
        Ok(Self::new(Ipv4Addr::from(octets), port))
    }

    /// The 15-character zero-padded dotted-decimal form.
    pub fn wire_ip(&self) -> String {
        let o = self.ip.octets();
        format!("{:03}.{:03}.{:03}.{:03}", o[0], o[1], o[2], o[3])
    }

    /// The 5-digit zero-padded port form.
    pub fn wire_port(&self) -> String {
        format!("{:05}", self.port)
    }

    /// The 20-character IP + port entry form used in Reunion bodies.
    pub fn wire_entry(&self) -> String {
        let mut s = self.wire_ip();
        s.push_str(&self.wire_port());
        s
    }

    /// Parse one 20-character Reunion entry.
    pub fn parse_entry(entry: &str) -> Result<Self, WireError> {
        if entry.len() != ENTRY_TEXT_LEN {
            return Err(WireError::InvalidAddress(entry.to_string()));
        }
        let (ip, port) = entry.split_at(IP_TEXT_LEN);
        Self::parse(ip, port)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.wire_ip(), self.wire_port())
    }
}

impl FromStr for Address {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s
            .rsplit_once(':')
            .ok_or_else(|| WireError::InvalidAddress(s.to_string()))?;
        Self::parse(ip, port)
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}
