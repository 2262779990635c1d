//! The vessel connection map: exactly one connection per vessel identity, up to a hard cap,
//! fanning task frames out and result/ack frames in.

use relay_core::task::VesselOutbound;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Reference configuration permits three concurrent vessel connections.
pub const MAX_CONNECTIONS: usize = 3;

pub const HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug)]
pub enum ConnectError {
    Duplicate,
    Capacity,
}

/// Per-connection sender used by the dispatcher/task-store drain loop to push a framed message
/// to this vessel's outbound loop.
pub type VesselSender = mpsc::UnboundedSender<VesselOutbound>;

pub struct VesselRegistry {
    connections: tokio::sync::Mutex<HashMap<String, VesselSender>>,
}

impl VesselRegistry {
    pub fn new() -> Self {
        Self {
            connections: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new connection, rejecting a duplicate vessel-id or a full connection table.
    pub async fn connect(
        &self,
        vessel_id: &str,
    ) -> Result<(VesselSender, mpsc::UnboundedReceiver<VesselOutbound>), ConnectError> {
        let mut connections = self.connections.lock().await;
        if connections.contains_key(vessel_id) {
            return Err(ConnectError::Duplicate);
        }
        if connections.len() >= MAX_CONNECTIONS {
            return Err(ConnectError::Capacity);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        connections.insert(vessel_id.to_string(), tx.clone());
        Ok((tx, rx))
    }

    pub async fn disconnect(&self, vessel_id: &str) {
        self.connections.lock().await.remove(vessel_id);
    }

    pub async fn is_connected(&self, vessel_id: &str) -> bool {
        self.connections.lock().await.contains_key(vessel_id)
    }

    pub async fn connected_ids(&self) -> Vec<String> {
        self.connections.lock().await.keys().cloned().collect()
    }

    /// Sends a frame to a connected vessel, e.g. a `cancel_task` request. No-ops if the vessel
    /// has disconnected (the orphan sweep will resolve any running session).
    pub async fn send(&self, vessel_id: &str, message: VesselOutbound) {
        let connections = self.connections.lock().await;
        if let Some(tx) = connections.get(vessel_id) {
            let _ = tx.send(message);
        }
    }
}

impl Default for VesselRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_duplicate_vessel_id() {
        let registry = VesselRegistry::new();
        let _first = registry.connect("vessel-1").await.unwrap();
        let second = registry.connect("vessel-1").await;
        assert!(matches!(second, Err(ConnectError::Duplicate)));
    }

    #[tokio::test]
    async fn rejects_beyond_capacity() {
        let registry = VesselRegistry::new();
        for i in 0..MAX_CONNECTIONS {
            registry.connect(&format!("vessel-{i}")).await.unwrap();
        }
        let overflow = registry.connect("vessel-overflow").await;
        assert!(matches!(overflow, Err(ConnectError::Capacity)));
    }

    #[tokio::test]
    async fn disconnect_frees_the_slot() {
        let registry = VesselRegistry::new();
        registry.connect("vessel-1").await.unwrap();
        registry.disconnect("vessel-1").await;
        assert!(registry.connect("vessel-1").await.is_ok());
    }
}
