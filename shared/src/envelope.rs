//! Wire types for the server↔drone envelope protocol
//!
//! Everything on the broker is JSON. The unit of exchange is an addressed
//! [`Envelope`] whose payload is either a single instruction to execute now
//! (`service`) or mission data for the upload/fly sub-protocol (`plan`).
//! All tags are closed enums: an unknown `dataType` or `specialInstruction`
//! is a deserialization error at the transport boundary, never a silent no-op.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload class carried by an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Execute this single instruction now.
    #[serde(rename = "service")]
    Service,
    /// Payload is mission data; run the upload/fly sub-protocol, unencrypted.
    #[serde(rename = "plan")]
    Plan,
}

/// The addressed, typed message unit exchanged over the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub drone_name: String,
    /// Logical service this message belongs to. Stamped by the sender so the
    /// receiving node can route it to the right handler queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    pub data_type: DataType,
    pub data_package: CipherEnvelope,
}

impl Envelope {
    /// Create an envelope stamped with the given service name.
    pub fn new(
        drone_name: impl Into<String>,
        service_type: impl Into<String>,
        data_type: DataType,
        data_package: CipherEnvelope,
    ) -> Self {
        Self {
            drone_name: drone_name.into(),
            service_type: Some(service_type.into()),
            data_type,
            data_package,
        }
    }

    /// Serialize for publication.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse an envelope received from the broker.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Payload wrapper distinguishing ciphered from plaintext content.
///
/// When `encrypt` is true, `data` is a base64 ciphertext string; otherwise it
/// is the plaintext command object itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherEnvelope {
    pub data: Value,
    pub encrypt: bool,
}

impl CipherEnvelope {
    /// Wrap a plaintext payload.
    pub fn plain<T: Serialize>(payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            data: serde_json::to_value(payload)?,
            encrypt: false,
        })
    }

    /// Wrap a base64 ciphertext.
    pub fn sealed(ciphertext_b64: String) -> Self {
        Self {
            data: Value::String(ciphertext_b64),
            encrypt: true,
        }
    }

    /// The ciphertext string, when this package is encrypted.
    pub fn ciphertext(&self) -> Option<&str> {
        if self.encrypt {
            self.data.as_str()
        } else {
            None
        }
    }
}

/// Special-case flight instructions, defaulting to a one-shot relative move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpecialInstruction {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "takeOff")]
    TakeOff,
    #[serde(rename = "land")]
    Land,
    #[serde(rename = "continueStart")]
    ContinueStart,
    #[serde(rename = "continueStop")]
    ContinueStop,
}

/// A single flight instruction for the drone-side interpreter.
///
/// `x`/`y`/`z` are body-frame forward/right/down values: meters for relative
/// moves, meters per second for continuous motion. They are ignored by
/// takeoff, land, and stop instructions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightCommand {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default)]
    pub special_instruction: SpecialInstruction,
}

impl FlightCommand {
    /// A pure special instruction with no motion component.
    pub fn instruction(special_instruction: SpecialInstruction) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            special_instruction,
        }
    }
}

/// A single mission waypoint (degrees, degrees, meters relative altitude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

/// Mission data carried by a `plan` envelope: a non-empty ordered waypoint
/// sequence for one drone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionPayload {
    pub waypoints: Vec<Waypoint>,
}

/// Outcome of a per-drone operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "error")]
    Error,
}

/// Per-drone status object. A drone's failure is encoded here and never
/// raised past the per-drone dispatch boundary, so fleet-wide commands keep
/// processing the remaining drones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReport {
    pub drone_name: String,
    pub status: ReportStatus,
    pub msg: String,
    pub time: u64,
}

impl CommandReport {
    pub fn success(drone_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            drone_name: drone_name.into(),
            status: ReportStatus::Success,
            msg: msg.into(),
            time: crate::now_ms(),
        }
    }

    pub fn error(drone_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            drone_name: drone_name.into(),
            status: ReportStatus::Error,
            msg: msg.into(),
            time: crate::now_ms(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }
}
