//! Command dispatch
//!
//! Turns operator intent into wire envelopes for individual drones and
//! applies the per-drone encryption policy on the way out.

use std::sync::Arc;

use aerolink_shared::{
    seal_command, CipherEnvelope, CommandReport, DataType, Envelope, FlightCommand, KeyStore,
    MissionPayload, TransportSender, Waypoint,
};
use anyhow::Result;
use tracing::{info, warn};

pub struct CommandDispatcher {
    sender: TransportSender,
    key_store: Arc<dyn KeyStore>,
    service_name: String,
}

impl CommandDispatcher {
    pub fn new(
        sender: TransportSender,
        key_store: Arc<dyn KeyStore>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            key_store,
            service_name: service_name.into(),
        }
    }

    /// Send one flight instruction to one drone.
    ///
    /// With `encrypt` set, the command is sealed under the drone's agreed
    /// key. A drone with no key on record still gets the command, but in the
    /// clear and with an error report, so the operator sees the degraded
    /// delivery.
    pub async fn dispatch_command(
        &self,
        drone_name: &str,
        command: &FlightCommand,
        encrypt: bool,
    ) -> CommandReport {
        if !encrypt {
            return match self.publish_plaintext(drone_name, command) {
                Ok(()) => CommandReport::success(drone_name, "command dispatched"),
                Err(e) => CommandReport::error(drone_name, format!("dispatch failed: {e}")),
            };
        }

        let Some(key) = self.key_store.lookup_key(drone_name).await else {
            warn!(drone = %drone_name, "no agreed key on record, sending unencrypted");
            return match self.publish_plaintext(drone_name, command) {
                Ok(()) => CommandReport::error(
                    drone_name,
                    "no agreed key on record; command sent unencrypted",
                ),
                Err(e) => CommandReport::error(drone_name, format!("dispatch failed: {e}")),
            };
        };

        let result = seal_command(&key, command)
            .map_err(anyhow::Error::from)
            .and_then(|ciphertext| {
                self.publish(drone_name, DataType::Service, CipherEnvelope::sealed(ciphertext))
            });
        match result {
            Ok(()) => {
                info!(drone = %drone_name, "encrypted command dispatched");
                CommandReport::success(drone_name, "encrypted command dispatched")
            }
            Err(e) => CommandReport::error(drone_name, format!("dispatch failed: {e}")),
        }
    }

    /// Mission payloads go out as `plan` envelopes, always in the clear.
    pub fn dispatch_plan(&self, drone_name: &str, waypoints: Vec<Waypoint>) -> CommandReport {
        let payload = MissionPayload { waypoints };
        let package = match CipherEnvelope::plain(&payload) {
            Ok(package) => package,
            Err(e) => {
                return CommandReport::error(drone_name, format!("mission encode failed: {e}"))
            }
        };
        match self.publish(drone_name, DataType::Plan, package) {
            Ok(()) => {
                info!(drone = %drone_name, "mission plan dispatched");
                CommandReport::success(drone_name, "mission plan dispatched")
            }
            Err(e) => CommandReport::error(drone_name, format!("dispatch failed: {e}")),
        }
    }

    fn publish_plaintext(&self, drone_name: &str, command: &FlightCommand) -> Result<()> {
        let package = CipherEnvelope::plain(command)?;
        self.publish(drone_name, DataType::Service, package)
    }

    fn publish(
        &self,
        drone_name: &str,
        data_type: DataType,
        package: CipherEnvelope,
    ) -> Result<()> {
        let envelope = Envelope::new(drone_name, &self.service_name, data_type, package);
        let bytes = envelope.to_bytes()?;
        self.sender.send(drone_name, bytes)?;
        Ok(())
    }
}
