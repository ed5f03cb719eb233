//! The record every sink persists for one datagram.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Duration, SecondsFormat, Utc};

use loralogger_core::wire::GatewayId;

/// Days a capture is kept in the TTL store.
pub const EXPIRY_DAYS: i64 = 14;

/// One captured datagram, stamped at receive time. Write-once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub gateway_id: GatewayId,
    /// The whole datagram, header included.
    pub packet: Bytes,
    pub received_at: DateTime<Utc>,
}

impl Record {
    pub fn new(gateway_id: GatewayId, packet: Bytes, received_at: DateTime<Utc>) -> Self {
        Self {
            gateway_id,
            packet,
            received_at,
        }
    }

    /// Standard padded base64 of the datagram.
    pub fn packet_base64(&self) -> String {
        BASE64.encode(&self.packet)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.received_at + Duration::days(EXPIRY_DAYS)
    }

    /// One partition per receive day: `raw#2026-10-18`.
    pub fn partition_key(&self) -> String {
        self.received_at.format("raw#%Y-%m-%d").to_string()
    }

    /// Time of day with microseconds: `14:03:07.123456`.
    pub fn sort_key(&self) -> String {
        self.received_at.format("%H:%M:%S%.6f").to_string()
    }

    /// `<rfc3339>, <gateway id>, <base64>\n`
    pub fn log_line(&self) -> String {
        format!(
            "{}, {}, {}\n",
            self.received_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.gateway_id,
            self.packet_base64()
        )
    }
}
