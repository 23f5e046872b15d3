//! Drone-side message router
//!
//! Parses raw broker bytes into envelopes and fans them out by service
//! type, so each service handler drains its own queue at its own pace.

use std::collections::HashMap;

use aerolink_shared::{Envelope, Transport, TransportError};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Default)]
pub struct MessageRouter {
    channels: HashMap<String, mpsc::UnboundedSender<Envelope>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service; envelopes stamped with this service type land in
    /// the returned queue.
    pub fn register(&mut self, service: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(service.to_string(), tx);
        rx
    }

    /// Route one raw broker message. Unparseable envelopes and unknown
    /// service types are logged and dropped.
    pub fn route(&self, bytes: &[u8]) {
        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("dropping unparseable envelope: {e}");
                return;
            }
        };
        let service = envelope.service_type.clone().unwrap_or_default();
        match self.channels.get(&service) {
            Some(tx) => {
                let _ = tx.send(envelope);
            }
            None => warn!(service, "dropping message for unregistered service"),
        }
    }

    /// Pump the transport into the router until the transport dies.
    pub async fn run(self, mut transport: Transport) -> Result<(), TransportError> {
        loop {
            let bytes = transport.recv().await?;
            self.route(&bytes);
        }
    }
}
