//! Key-store lookup contract
//!
//! The relational key store itself is an external collaborator; the only
//! schema detail in scope is the lookup of a drone's agreed key.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cipher::Sm4Key;

/// Lookup interface over the external key store.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// The agreed symmetric key for a drone, or `None` when no key agreement
    /// has been recorded for that name.
    async fn lookup_key(&self, drone_name: &str) -> Option<Sm4Key>;
}

/// In-memory key store, loaded from configuration. Used for wiring and tests.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, Sm4Key>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(keys: HashMap<String, Sm4Key>) -> Self {
        Self {
            keys: RwLock::new(keys),
        }
    }

    pub async fn insert(&self, drone_name: impl Into<String>, key: Sm4Key) {
        self.keys.write().await.insert(drone_name.into(), key);
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn lookup_key(&self, drone_name: &str) -> Option<Sm4Key> {
        self.keys.read().await.get(drone_name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_hit_and_miss() {
        let store = MemoryKeyStore::new();
        store
            .insert("UAV01", Sm4Key::new([7u8; crate::cipher::KEY_LEN]))
            .await;

        assert!(store.lookup_key("UAV01").await.is_some());
        assert!(store.lookup_key("UAV99").await.is_none());
    }
}
