//! Drone node configuration

use std::collections::HashMap;
use std::path::Path;

use aerolink_shared::{MemoryKeyStore, MqConfig, Sm4Key};
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::autopilot::AutopilotConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// This drone's unique name; doubles as its broker routing key.
    pub drone_name: String,
    /// Logical service this node answers to.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    pub rabbitmq: MqConfig,
    #[serde(default)]
    pub autopilot: AutopilotSettings,
    /// Agreed key from the key-agreement step, hex-encoded.
    #[serde(default)]
    pub agree_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutopilotSettings {
    #[serde(default = "default_connection")]
    pub connection: String,
    #[serde(default = "default_takeoff_altitude")]
    pub takeoff_altitude_m: f32,
    #[serde(default = "default_stream_rate")]
    pub stream_rate_hz: u16,
}

impl Default for AutopilotSettings {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            takeoff_altitude_m: default_takeoff_altitude(),
            stream_rate_hz: default_stream_rate(),
        }
    }
}

fn default_service_name() -> String {
    "flightControl".to_string()
}

fn default_connection() -> String {
    "udpin:127.0.0.1:14550".to_string()
}

fn default_takeoff_altitude() -> f32 {
    10.0
}

fn default_stream_rate() -> u16 {
    4
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn autopilot_config(&self) -> AutopilotConfig {
        AutopilotConfig {
            connection: self.autopilot.connection.clone(),
            takeoff_altitude_m: self.autopilot.takeoff_altitude_m,
            stream_rate_hz: self.autopilot.stream_rate_hz,
            ..AutopilotConfig::default()
        }
    }

    /// Key store holding this drone's own agreed key, when configured.
    pub fn key_store(&self) -> Result<MemoryKeyStore> {
        let mut keys = HashMap::new();
        if let Some(hex_key) = &self.agree_key {
            let key = Sm4Key::from_hex(hex_key).context("invalid agree_key")?;
            keys.insert(self.drone_name.clone(), key);
        }
        Ok(MemoryKeyStore::with_keys(keys))
    }
}
