//! Packet layout and codec
//!
//! ## Header (20 bytes, all big-endian)
//!
//! ```text
//! version (u16) || type (u16) || body_len (u32)
//! || source_ip (4 x u16 octets = 8 bytes) || source_port (u32)
//! ```
//!
//! Types: 1 Register, 2 Advertise, 3 Join, 4 Message, 5 Reunion.
//!
//! ## Bodies (UTF-8, fixed widths)
//!
//! ```text
//! Register  REQ: "REQ" + ip(15) + port(5)          (23 bytes)
//!           RES: "RESACK"                          (6 bytes)
//! Advertise REQ: "REQ"                             (3 bytes)
//!           RES: "RES" + ip(15) + port(5)          (23 bytes)
//! Join:          "JOIN"                            (4 bytes)
//! Message:       raw UTF-8 text
//! Reunion:       "REQ"|"RES" + count(2) + count x (ip(15) + port(5))
//! ```
//!
//! Register, Advertise and Reunion bodies carry `"REQ"`/`"RES"` in their
//! first three bytes to disambiguate request from response within one
//! packet type.

use bytes::{BufMut, Bytes, BytesMut};

use crate::address::{Address, ENTRY_TEXT_LEN};
use crate::error::WireError;

/// Protocol version carried in every header.
pub const PROTOCOL_VERSION: u16 = 1;
/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 20;
/// Widest path the 2-digit Reunion entry count can carry. Longer paths
/// are truncated at encode time to keep the fixed-width layout intact.
pub const MAX_REUNION_PATH: usize = 99;

/// Packet type discriminant as carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketKind {
    Register = 1,
    Advertise = 2,
    Join = 3,
    Message = 4,
    Reunion = 5,
}

impl PacketKind {
    pub fn from_wire(raw: u16) -> Result<Self, WireError> {
        match raw {
            1 => Ok(Self::Register),
            2 => Ok(Self::Advertise),
            3 => Ok(Self::Join),
            4 => Ok(Self::Message),
            5 => Ok(Self::Reunion),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// Typed packet body.
///
/// The Reunion paths are ordered deepest-sender-first in a request
/// (each forwarder appends itself) and root-to-leaf in a response
/// (the root reverses the request path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    RegisterRequest { addr: Address },
    RegisterResponse,
    AdvertiseRequest,
    AdvertiseResponse { neighbour: Address },
    Join,
    Message { text: String },
    ReunionRequest { path: Vec<Address> },
    ReunionResponse { path: Vec<Address> },
}

impl PacketBody {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::RegisterRequest { .. } | Self::RegisterResponse => PacketKind::Register,
            Self::AdvertiseRequest | Self::AdvertiseResponse { .. } => PacketKind::Advertise,
            Self::Join => PacketKind::Join,
            Self::Message { .. } => PacketKind::Message,
            Self::ReunionRequest { .. } | Self::ReunionResponse { .. } => PacketKind::Reunion,
        }
    }

    /// Render the exact wire text of this body.
    pub fn to_wire(&self) -> String {
        match self {
            Self::RegisterRequest { addr } => format!("REQ{}", addr.wire_entry()),
            Self::RegisterResponse => "RESACK".to_string(),
            Self::AdvertiseRequest => "REQ".to_string(),
            Self::AdvertiseResponse { neighbour } => format!("RES{}", neighbour.wire_entry()),
            Self::Join => "JOIN".to_string(),
            Self::Message { text } => text.clone(),
            Self::ReunionRequest { path } => Self::reunion_wire("REQ", path),
            Self::ReunionResponse { path } => Self::reunion_wire("RES", path),
        }
    }

    fn reunion_wire(tag: &str, path: &[Address]) -> String {
        debug_assert!(!path.is_empty());
        // The depth cap keeps real paths at <= 8 entries, but a
        // three-digit count would corrupt the layout, so overlong
        // paths keep only their first MAX_REUNION_PATH hops.
        let path = &path[..path.len().min(MAX_REUNION_PATH)];
        let mut body = String::with_capacity(5 + path.len() * ENTRY_TEXT_LEN);
        body.push_str(tag);
        body.push_str(&format!("{:02}", path.len()));
        for addr in path {
            body.push_str(&addr.wire_entry());
        }
        body
    }

    fn parse(kind: PacketKind, body: &str) -> Result<Self, WireError> {
        match kind {
            PacketKind::Register => {
                if let Some(entry) = body.strip_prefix("REQ") {
                    let addr = Address::parse_entry(entry)
                        .map_err(|_| WireError::MalformedBody("Register"))?;
                    Ok(Self::RegisterRequest { addr })
                } else if body == "RESACK" {
                    Ok(Self::RegisterResponse)
                } else {
                    Err(WireError::MalformedBody("Register"))
                }
            }
            PacketKind::Advertise => {
                if body == "REQ" {
                    Ok(Self::AdvertiseRequest)
                } else if let Some(entry) = body.strip_prefix("RES") {
                    let neighbour = Address::parse_entry(entry)
                        .map_err(|_| WireError::MalformedBody("Advertise"))?;
                    Ok(Self::AdvertiseResponse { neighbour })
                } else {
                    Err(WireError::MalformedBody("Advertise"))
                }
            }
            PacketKind::Join => {
                if body == "JOIN" {
                    Ok(Self::Join)
                } else {
                    Err(WireError::MalformedBody("Join"))
                }
            }
            PacketKind::Message => Ok(Self::Message {
                text: body.to_string(),
            }),
            PacketKind::Reunion => {
                let tag = body.get(..3).ok_or(WireError::MalformedBody("Reunion"))?;
                let count: usize = body
                    .get(3..5)
                    .and_then(|s| s.parse().ok())
                    .ok_or(WireError::MalformedBody("Reunion"))?;
                let entries = body.get(5..).ok_or(WireError::MalformedBody("Reunion"))?;
                if count == 0 || entries.len() != count * ENTRY_TEXT_LEN {
                    return Err(WireError::EntryCountMismatch {
                        declared: count,
                        body_len: body.len(),
                    });
                }
                let mut path = Vec::with_capacity(count);
                for i in 0..count {
                    let entry = entries
                        .get(i * ENTRY_TEXT_LEN..(i + 1) * ENTRY_TEXT_LEN)
                        .ok_or(WireError::MalformedBody("Reunion"))?;
                    path.push(Address::parse_entry(entry)?);
                }
                match tag {
                    "REQ" => Ok(Self::ReunionRequest { path }),
                    "RES" => Ok(Self::ReunionResponse { path }),
                    _ => Err(WireError::MalformedBody("Reunion")),
                }
            }
        }
    }
}

/// A decoded packet: header fields plus typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u16,
    pub source: Address,
    pub body: PacketBody,
}

impl Packet {
    /// Build a version-1 packet from this peer.
    pub fn new(source: Address, body: PacketBody) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            source,
            body,
        }
    }

    pub fn kind(&self) -> PacketKind {
        self.body.kind()
    }

    /// A packet is a request unless its body starts with `"RES"`.
    pub fn is_request(&self) -> bool {
        !self.body.to_wire().starts_with("RES")
    }

    /// Encode header + body into one wire frame.
    pub fn encode(&self) -> Bytes {
        let body = self.body.to_wire();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        buf.put_u16(self.version);
        buf.put_u16(self.kind() as u16);
        buf.put_u32(body.len() as u32);
        for octet in self.source.ip().octets() {
            buf.put_u16(octet as u16);
        }
        buf.put_u32(self.source.port() as u32);
        buf.put_slice(body.as_bytes());
        buf.freeze()
    }

    /// Decode one framed packet.
    ///
    /// The transport guarantees message framing, so `data` holds exactly
    /// one packet; the body is sliced by the declared length.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_LEN {
            return Err(WireError::TruncatedHeader(data.len()));
        }
        let version = u16::from_be_bytes([data[0], data[1]]);
        if version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let kind = PacketKind::from_wire(u16::from_be_bytes([data[2], data[3]]))?;
        let body_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;

        let mut octets = [0u8; 4];
        for (i, slot) in octets.iter_mut().enumerate() {
            let raw = u16::from_be_bytes([data[8 + 2 * i], data[9 + 2 * i]]);
            *slot = u8::try_from(raw).map_err(|_| WireError::InvalidIpOctet(raw))?;
        }
        let raw_port = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
        let port = u16::try_from(raw_port).map_err(|_| WireError::InvalidPort(raw_port))?;
        let source = Address::new(octets.into(), port);

        let available = data.len() - HEADER_LEN;
        if available < body_len {
            return Err(WireError::TruncatedBody {
                declared: body_len,
                available,
            });
        }
        let body = std::str::from_utf8(&data[HEADER_LEN..HEADER_LEN + body_len])
            .map_err(|_| WireError::InvalidUtf8)?;
        Ok(Self {
            version,
            source,
            body: PacketBody::parse(kind, body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(a: u8, b: u8, c: u8, d: u8, port: u16) -> Address {
        Address::new(Ipv4Addr::new(a, b, c, d), port)
    }

    #[test]
    fn test_known_message_frame() {
        // Hand-computed reference frame: version 1, type 4, 12-byte body,
        // source 192.168.1.1:65000, body "Hello World!".
        let packet = Packet::new(
            addr(192, 168, 1, 1, 65000),
            PacketBody::Message {
                text: "Hello World!".to_string(),
            },
        );
        let expected: &[u8] = b"\x00\x01\x00\x04\x00\x00\x00\x0c\
            \x00\xc0\x00\xa8\x00\x01\x00\x01\x00\x00\xfd\xe8Hello World!";
        assert_eq!(packet.encode().as_ref(), expected);
        assert_eq!(Packet::decode(expected).unwrap(), packet);
    }

    #[test]
    fn test_roundtrip_every_body() {
        let me = addr(10, 0, 0, 1, 5001);
        let other = addr(172, 16, 254, 9, 65535);
        let bodies = vec![
            PacketBody::RegisterRequest { addr: me },
            PacketBody::RegisterResponse,
            PacketBody::AdvertiseRequest,
            PacketBody::AdvertiseResponse { neighbour: other },
            PacketBody::Join,
            PacketBody::Message {
                text: "hi there".to_string(),
            },
            PacketBody::ReunionRequest {
                path: vec![me, other],
            },
            PacketBody::ReunionResponse {
                path: vec![other, me],
            },
        ];
        for body in bodies {
            let packet = Packet::new(me, body);
            let decoded = Packet::decode(&packet.encode()).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_roundtrip_reunion_paths_up_to_depth_cap() {
        let me = addr(127, 0, 0, 1, 5000);
        for n in 1..=8 {
            let path: Vec<Address> = (0..n)
                .map(|i: u16| addr(10, 0, 0, i as u8 + 1, 5000 + i))
                .collect();
            let packet = Packet::new(me, PacketBody::ReunionRequest { path: path.clone() });
            match Packet::decode(&packet.encode()).unwrap().body {
                PacketBody::ReunionRequest { path: decoded } => assert_eq!(decoded, path),
                other => panic!("wrong body: {other:?}"),
            }
        }
    }

    #[test]
    fn test_overlong_reunion_path_is_truncated() {
        let me = addr(127, 0, 0, 1, 5000);
        let path: Vec<Address> = (0..120u16)
            .map(|i| addr(10, 0, (i / 250) as u8, (i % 250) as u8 + 1, 5000 + i))
            .collect();
        let packet = Packet::new(me, PacketBody::ReunionRequest { path: path.clone() });

        let frame = packet.encode();
        assert_eq!(
            frame.len(),
            HEADER_LEN + 5 + MAX_REUNION_PATH * ENTRY_TEXT_LEN
        );
        match Packet::decode(&frame).unwrap().body {
            PacketBody::ReunionRequest { path: decoded } => {
                assert_eq!(decoded, path[..MAX_REUNION_PATH]);
            }
            other => panic!("wrong body: {other:?}"),
        }
    }

    #[test]
    fn test_body_widths() {
        let me = addr(1, 2, 3, 4, 5);
        assert_eq!(PacketBody::RegisterRequest { addr: me }.to_wire().len(), 23);
        assert_eq!(PacketBody::RegisterResponse.to_wire().len(), 6);
        assert_eq!(PacketBody::AdvertiseRequest.to_wire().len(), 3);
        assert_eq!(
            PacketBody::AdvertiseResponse { neighbour: me }.to_wire().len(),
            23
        );
        assert_eq!(PacketBody::Join.to_wire().len(), 4);
        assert_eq!(
            PacketBody::ReunionRequest { path: vec![me, me, me] }
                .to_wire()
                .len(),
            5 + 3 * 20
        );
    }

    #[test]
    fn test_is_request() {
        let me = addr(1, 2, 3, 4, 5);
        assert!(Packet::new(me, PacketBody::RegisterRequest { addr: me }).is_request());
        assert!(!Packet::new(me, PacketBody::RegisterResponse).is_request());
        assert!(Packet::new(me, PacketBody::AdvertiseRequest).is_request());
        assert!(!Packet::new(me, PacketBody::AdvertiseResponse { neighbour: me }).is_request());
        assert!(Packet::new(me, PacketBody::Join).is_request());
        assert!(!Packet::new(me, PacketBody::ReunionResponse { path: vec![me] }).is_request());
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            Packet::decode(&[0, 1, 0, 4]),
            Err(WireError::TruncatedHeader(4))
        ));
    }

    #[test]
    fn test_body_shorter_than_declared() {
        let me = addr(1, 2, 3, 4, 5);
        let packet = Packet::new(
            me,
            PacketBody::Message {
                text: "hello".to_string(),
            },
        );
        let frame = packet.encode();
        let result = Packet::decode(&frame[..frame.len() - 2]);
        assert!(matches!(result, Err(WireError::TruncatedBody { .. })));
    }

    #[test]
    fn test_rejects_bad_header_fields() {
        let me = addr(1, 2, 3, 4, 5);
        let mut frame = Packet::new(me, PacketBody::Join).encode().to_vec();

        // Version 2 is not spoken here.
        frame[0] = 0;
        frame[1] = 2;
        assert!(matches!(
            Packet::decode(&frame),
            Err(WireError::UnsupportedVersion(2))
        ));
        frame[1] = 1;

        // Type 9 does not exist.
        frame[3] = 9;
        assert!(matches!(
            Packet::decode(&frame),
            Err(WireError::UnknownType(9))
        ));
        frame[3] = 3;

        // IP octet beyond u8.
        frame[8] = 1;
        assert!(matches!(
            Packet::decode(&frame),
            Err(WireError::InvalidIpOctet(257))
        ));
        frame[8] = 0;

        // Port beyond u16.
        frame[16] = 1;
        assert!(matches!(
            Packet::decode(&frame),
            Err(WireError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_rejects_non_numeric_body_address() {
        let me = addr(1, 2, 3, 4, 5);
        let mut frame = Packet::new(me, PacketBody::RegisterRequest { addr: me })
            .encode()
            .to_vec();
        // Corrupt one digit of the body IP.
        frame[HEADER_LEN + 4] = b'x';
        assert!(matches!(
            Packet::decode(&frame),
            Err(WireError::MalformedBody("Register"))
        ));
    }

    #[test]
    fn test_rejects_reunion_count_mismatch() {
        let me = addr(1, 2, 3, 4, 5);
        let mut frame = Packet::new(me, PacketBody::ReunionRequest { path: vec![me, me] })
            .encode()
            .to_vec();
        // Claim three entries while carrying two.
        frame[HEADER_LEN + 4] = b'3';
        assert!(matches!(
            Packet::decode(&frame),
            Err(WireError::EntryCountMismatch { declared: 3, .. })
        ));
    }
}
