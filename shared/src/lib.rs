//! AeroLink Shared Protocol Layer
//!
//! This crate provides the pieces used identically by the server and the
//! drone nodes: the JSON envelope types exchanged over the broker, the
//! SM4-ECB secure channel primitives, the key-store lookup contract, and the
//! reconnecting AMQP transport fabric.

pub mod cipher;
pub mod envelope;
pub mod keystore;
pub mod transport;

pub use cipher::{open_command, seal_command, CipherError, Sm4Key};
pub use envelope::{
    CipherEnvelope, CommandReport, DataType, Envelope, FlightCommand, MissionPayload,
    ReportStatus, SpecialInstruction, Waypoint,
};
pub use keystore::{KeyStore, MemoryKeyStore};
pub use transport::{
    Endpoint, MqConfig, OutboundMessage, Transport, TransportError, TransportSender,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
