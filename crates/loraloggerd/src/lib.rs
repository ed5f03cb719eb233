//! loraloggerd — passive collector for LoRa packet-forwarder traffic.
//!
//! Listens for the UDP datagrams gateways send, identifies the gateway
//! from the packet-forwarder header, and records every datagram to the
//! configured sinks. Never replies and never forwards.

pub mod collector;
pub mod pipeline;

pub use collector::{Collector, CollectorError};
pub use pipeline::{handle_datagram, Datagram, HandleError, Outcome};
