//! Semtech packet-forwarder wire format, as far as the collector needs it.
//!
//! Every datagram a gateway sends starts with a 4-byte prefix:
//!
//! ```text
//!  0         1         3         4                  12
//!  +---------+---------+---------+------------------+-----------------
//!  | version |  token  |  kind   | gateway EUI (BE) | JSON payload ...
//!  +---------+---------+---------+------------------+-----------------
//! ```
//!
//! The gateway EUI is only present for the kinds a gateway originates
//! (PUSH_DATA, PULL_DATA, TX_ACK). The payload after it is opaque here.
//!
//! Decoding is pure: no state, no I/O, safe to call from any task.

use std::fmt;
use std::str::FromStr;

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// The only packet-forwarder protocol version the collector accepts.
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Length of the version + token + kind prefix.
pub const PREFIX_LEN: usize = 4;

/// Length of the gateway EUI that follows the prefix.
pub const GATEWAY_ID_LEN: usize = 8;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM: usize = 65507;

// ── Header prefix ─────────────────────────────────────────────────────────────

/// The fixed prefix shared by every packet-forwarder datagram.
///
/// Wire size: 4 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct HeaderPrefix {
    /// Protocol version. Must equal [`PROTOCOL_VERSION`].
    pub version: u8,

    /// Random token chosen by the gateway to match acknowledgements.
    /// Not interpreted by the collector.
    pub token: [u8; 2],

    /// Packet kind identifier, see [`PacketKind`].
    pub kind: u8,
}

assert_eq_size!(HeaderPrefix, [u8; PREFIX_LEN]);

// ── Packet kind ───────────────────────────────────────────────────────────────

/// Packet kind carried in byte 3 of the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Gateway → server: received uplinks and status.
    PushData = 0x00,
    /// Server → gateway: acknowledges PUSH_DATA.
    PushAck = 0x01,
    /// Gateway → server: keep-alive opening the downlink path.
    PullData = 0x02,
    /// Server → gateway: downlink to transmit.
    PullResp = 0x03,
    /// Server → gateway: acknowledges PULL_DATA.
    PullAck = 0x04,
    /// Gateway → server: result of a PULL_RESP transmission.
    TxAck = 0x05,
}

impl PacketKind {
    /// Whether the gateway EUI follows the prefix for this kind.
    pub fn carries_gateway_id(self) -> bool {
        matches!(
            self,
            PacketKind::PushData | PacketKind::PullData | PacketKind::TxAck
        )
    }

    /// Protocol name of this kind, e.g. `PUSH_DATA`.
    pub fn as_str(self) -> &'static str {
        match self {
            PacketKind::PushData => "PUSH_DATA",
            PacketKind::PushAck => "PUSH_ACK",
            PacketKind::PullData => "PULL_DATA",
            PacketKind::PullResp => "PULL_RESP",
            PacketKind::PullAck => "PULL_ACK",
            PacketKind::TxAck => "TX_ACK",
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PacketKind::PushData),
            0x01 => Ok(PacketKind::PushAck),
            0x02 => Ok(PacketKind::PullData),
            0x03 => Ok(PacketKind::PullResp),
            0x04 => Ok(PacketKind::PullAck),
            0x05 => Ok(PacketKind::TxAck),
            other => Err(DecodeError::UnknownPacketKind(other)),
        }
    }
}

impl From<PacketKind> for u8 {
    fn from(k: PacketKind) -> u8 {
        k as u8
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Gateway ID ────────────────────────────────────────────────────────────────

/// 8-byte gateway EUI, kept in wire (big-endian) order.
///
/// The canonical textual form is 16 lowercase hex characters; that string
/// is what every sink and log line uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GatewayId(pub [u8; GATEWAY_ID_LEN]);

impl GatewayId {
    pub fn as_bytes(&self) -> &[u8; GATEWAY_ID_LEN] {
        &self.0
    }

    /// The EUI as an integer, reading the wire bytes big-endian.
    pub fn as_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for GatewayId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut id = [0u8; GATEWAY_ID_LEN];
        hex::decode_to_slice(s, &mut id)
            .map_err(|_| DecodeError::InvalidGatewayId(s.to_string()))?;
        Ok(GatewayId(id))
    }
}

impl From<u64> for GatewayId {
    fn from(eui: u64) -> Self {
        GatewayId(eui.to_be_bytes())
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// Decoded view of a datagram's leading bytes.
///
/// Only produced by [`decode`]; a `Header` is always fully valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub token: u16,
    pub kind: PacketKind,
    /// Present iff `kind.carries_gateway_id()`.
    pub gateway_id: Option<GatewayId>,
}

/// Decode the packet-forwarder header at the start of `raw`.
pub fn decode(raw: &[u8]) -> Result<Header, DecodeError> {
    let prefix = HeaderPrefix::read_from_prefix(raw)
        .ok_or(DecodeError::MalformedHeader { len: raw.len() })?;

    if prefix.version != PROTOCOL_VERSION {
        return Err(DecodeError::UnsupportedVersion(prefix.version));
    }

    let kind = PacketKind::try_from(prefix.kind)?;

    let gateway_id = if kind.carries_gateway_id() {
        Some(read_gateway_id(kind, raw)?)
    } else {
        None
    };

    Ok(Header {
        version: prefix.version,
        token: u16::from_be_bytes(prefix.token),
        kind,
        gateway_id,
    })
}

/// Decode only the packet kind.
pub fn packet_kind(raw: &[u8]) -> Result<PacketKind, DecodeError> {
    decode(raw).map(|h| h.kind)
}

/// Decode only the gateway ID.
///
/// Kinds sent by the server side never carry one and fail with
/// `NoGatewayId`.
pub fn gateway_id(raw: &[u8]) -> Result<GatewayId, DecodeError> {
    let header = decode(raw)?;
    header
        .gateway_id
        .ok_or(DecodeError::NoGatewayId { kind: header.kind })
}

fn read_gateway_id(kind: PacketKind, raw: &[u8]) -> Result<GatewayId, DecodeError> {
    raw.get(PREFIX_LEN..PREFIX_LEN + GATEWAY_ID_LEN)
        .and_then(|b| <[u8; GATEWAY_ID_LEN]>::try_from(b).ok())
        .map(GatewayId)
        .ok_or(DecodeError::TruncatedGatewayId {
            kind,
            len: raw.len(),
        })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when decoding a packet-forwarder header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram of {len} bytes is shorter than the {} byte header", PREFIX_LEN)]
    MalformedHeader { len: usize },

    #[error("unsupported protocol version: 0x{0:02x}")]
    UnsupportedVersion(u8),

    #[error("unknown packet kind: 0x{0:02x}")]
    UnknownPacketKind(u8),

    #[error("{kind} datagram of {len} bytes has no room for a gateway id")]
    TruncatedGatewayId { kind: PacketKind, len: usize },

    #[error("{kind} datagrams carry no gateway id")]
    NoGatewayId { kind: PacketKind },

    #[error("invalid gateway id: {0:?}")]
    InvalidGatewayId(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
