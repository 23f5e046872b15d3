//! Server configuration

use std::collections::HashMap;
use std::path::Path;

use aerolink_shared::{MemoryKeyStore, MqConfig, Sm4Key};
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Logical service name announced on the broker and stamped on outgoing
    /// envelopes.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Bind address for the operator HTTP gateway.
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
    pub rabbitmq: MqConfig,
    /// Agreed per-drone keys, hex-encoded. Stands in for the key-agreement
    /// store in single-node deployments.
    #[serde(default)]
    pub keys: HashMap<String, String>,
}

fn default_service_name() -> String {
    "flightControl".to_string()
}

fn default_http_listen() -> String {
    "0.0.0.0:8000".to_string()
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn key_store(&self) -> Result<MemoryKeyStore> {
        let mut keys = HashMap::new();
        for (drone, hex_key) in &self.keys {
            let key = Sm4Key::from_hex(hex_key)
                .with_context(|| format!("invalid key for drone {drone}"))?;
            keys.insert(drone.clone(), key);
        }
        Ok(MemoryKeyStore::with_keys(keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerolink_shared::KeyStore;

    #[test]
    fn parses_a_minimal_config() {
        let config: ServerConfig = toml::from_str(
            r#"
            [rabbitmq]
            host = "mq.local"
            username = "ops"
            password = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.service_name, "flightControl");
        assert_eq!(config.http_listen, "0.0.0.0:8000");
        assert_eq!(config.rabbitmq.host, "mq.local");
    }

    #[tokio::test]
    async fn builds_a_key_store_from_hex_keys() {
        let config: ServerConfig = toml::from_str(
            r#"
            [rabbitmq]
            host = "mq.local"
            username = "ops"
            password = "secret"

            [keys]
            alpha = "000102030405060708090a0b0c0d0e0f"
            "#,
        )
        .unwrap();
        let store = config.key_store().unwrap();
        assert!(store.lookup_key("alpha").await.is_some());
        assert!(store.lookup_key("bravo").await.is_none());
    }

    #[test]
    fn rejects_a_malformed_key() {
        let config: ServerConfig = toml::from_str(
            r#"
            [rabbitmq]
            host = "mq.local"
            username = "ops"
            password = "secret"

            [keys]
            alpha = "not-hex"
            "#,
        )
        .unwrap();
        assert!(config.key_store().is_err());
    }
}
