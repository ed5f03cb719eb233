//! loralogger-core — packet-forwarder wire format and configuration.
//! All other loralogger crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{decode, DecodeError, GatewayId, Header, PacketKind};
