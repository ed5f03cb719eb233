//! Gateway registry — remembers where each gateway was last heard from.
//!
//! Kept for the downlink path: a PULL_RESP has to be sent to the address
//! the gateway's PULL_DATA came from. Nothing in the ingestion path writes
//! here yet.
//!
//! Entries are never evicted. Gateway populations per deployment are small,
//! so the map stays small; it is still unbounded.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use loralogger_core::wire::GatewayId;
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("gateway {0} does not exist")]
    GatewayNotFound(GatewayId),
}

/// Gateway ID → last-known source address.
///
/// Cloning shares the same map. One reader/writer lock guards the whole
/// map; concurrent writers race last-write-wins.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: Arc<RwLock<HashMap<GatewayId, SocketAddr>>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `addr` as the gateway's current address, replacing any previous one.
    pub fn set_gateway(&self, gateway_id: GatewayId, addr: SocketAddr) -> Result<(), RegistryError> {
        self.gateways.write().insert(gateway_id, addr);
        tracing::trace!(gateway_id = %gateway_id, addr = %addr, "gateway address updated");
        Ok(())
    }

    /// Last-known address of a gateway.
    pub fn get_gateway(&self, gateway_id: &GatewayId) -> Result<SocketAddr, RegistryError> {
        self.gateways
            .read()
            .get(gateway_id)
            .copied()
            .ok_or(RegistryError::GatewayNotFound(*gateway_id))
    }

    pub fn len(&self) -> usize {
        self.gateways.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.read().is_empty()
    }
}
