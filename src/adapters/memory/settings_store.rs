//! Settings store backed by a map.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;
use crate::domain::ports::SettingsStore;

/// In-memory user settings, keyed by owner.
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    values: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemorySettingsStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one key for `owner`, replacing any previous value.
    pub async fn set(&self, owner: &str, key: &str, value: &str) {
        self.values
            .write()
            .await
            .entry(owner.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get_all(&self, owner: &str) -> DomainResult<HashMap<String, String>> {
        Ok(self
            .values
            .read()
            .await
            .get(owner)
            .cloned()
            .unwrap_or_default())
    }
}
