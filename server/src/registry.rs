//! Client registry
//!
//! Server-side bookkeeping of connected drones. A drone is registered the
//! first time a message from it is observed on the broker; there is no
//! explicit handshake. Records live for the process lifetime.

use std::collections::HashMap;

use aerolink_shared::Envelope;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

struct ClientEntry {
    inbound: mpsc::UnboundedSender<Envelope>,
    /// Parked until a consumer claims it with `take_receiver`.
    pending_rx: Option<mpsc::UnboundedReceiver<Envelope>>,
}

/// Maps drone name to that drone's inbound queue. Shared between the
/// transport receive loop (writes) and whoever drains the queues (reads).
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ClientEntry>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Route an observed drone message into its queue, registering the drone
    /// on first sight. Returns true when this message created the
    /// registration, so the caller can attach a consumer.
    pub async fn deliver(&self, envelope: Envelope) -> bool {
        let name = envelope.drone_name.clone();
        let mut clients = self.clients.write().await;
        let created = !clients.contains_key(&name);
        let entry = clients.entry(name.clone()).or_insert_with(|| {
            info!(drone = %name, "drone connected");
            let (tx, rx) = mpsc::unbounded_channel();
            ClientEntry {
                inbound: tx,
                pending_rx: Some(rx),
            }
        });
        // Unbounded queue: delivery never blocks the receive loop, even
        // while the receiver is still parked.
        let _ = entry.inbound.send(envelope);
        created
    }

    /// Claim the inbound queue for a drone. Yields `Some` exactly once per
    /// registration.
    pub async fn take_receiver(
        &self,
        drone_name: &str,
    ) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        let mut clients = self.clients.write().await;
        clients.get_mut(drone_name)?.pending_rx.take()
    }

    pub async fn connected_drones(&self) -> Vec<String> {
        self.clients.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
