//! Settings store port - the user tier of settings resolution.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::errors::DomainResult;

/// Read-only key/value settings for one owner.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_all(&self, owner: &str) -> DomainResult<HashMap<String, String>>;
}

/// A store with no user settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySettingsStore;

#[async_trait]
impl SettingsStore for EmptySettingsStore {
    async fn get_all(&self, _owner: &str) -> DomainResult<HashMap<String, String>> {
        Ok(HashMap::new())
    }
}
