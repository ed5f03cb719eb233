//! Per-datagram work: decode the header, build the record, run the sinks.
//!
//! Runs on its own task for every datagram. Nothing here can reach back
//! into the ingestion loop; failures end with a log line.

use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use loralogger_core::wire::{self, DecodeError, GatewayId, PacketKind};
use loralogger_services::sink::PersistError;
use loralogger_services::{Record, SinkChain};

/// One received datagram and where it came from.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub data: Bytes,
}

/// What happened to a datagram that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Written to every sink the policy ran.
    Persisted {
        gateway_id: GatewayId,
        kind: PacketKind,
    },
    /// Valid header but no gateway ID to file it under.
    Skipped { kind: PacketKind },
}

#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("decode header: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Decode `datagram` and persist it through `sinks`.
pub async fn handle_datagram(
    datagram: &Datagram,
    sinks: &SinkChain,
    received_at: DateTime<Utc>,
) -> Result<Outcome, HandleError> {
    let header = wire::decode(&datagram.data)?;

    // Server-to-gateway kinds reaching the collector point at a misrouted
    // forwarder, so they stay visible.
    let Some(gateway_id) = header.gateway_id else {
        tracing::warn!(
            from_addr = %datagram.addr,
            packet_kind = %header.kind,
            "no gateway id, not persisting"
        );
        return Ok(Outcome::Skipped { kind: header.kind });
    };

    tracing::info!(
        from_addr = %datagram.addr,
        gateway_id = %gateway_id,
        packet_kind = %header.kind,
        "logging packet"
    );

    let record = Record::new(gateway_id, datagram.data.clone(), received_at);
    sinks.persist(&record).await?;

    Ok(Outcome::Persisted {
        gateway_id,
        kind: header.kind,
    })
}

/// Task body for one datagram. Reports failure through the log only.
pub async fn process(datagram: Datagram, sinks: &SinkChain) {
    if let Err(e) = handle_datagram(&datagram, sinks, Utc::now()).await {
        tracing::error!(
            error = %e,
            addr = %datagram.addr,
            data_base64 = %BASE64.encode(&datagram.data),
            "could not handle packet"
        );
    }
}
