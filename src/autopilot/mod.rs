//! ArduPilot integration: link management, telemetry tracking, one-shot
//! commands, and the mission sub-protocol.

pub mod commands;
pub mod connection;
pub mod mission;
pub mod state;

pub use commands::ArduPilotMode;
pub use connection::{Autopilot, AutopilotConfig};
pub use state::{VehicleSnapshot, VehicleState};
