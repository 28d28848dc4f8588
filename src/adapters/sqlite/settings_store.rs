//! SQLite-backed per-owner settings.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::SettingsLayer;
use crate::domain::ports::SettingsStore;

/// SQLite-backed [`SettingsStore`].
#[derive(Clone)]
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    /// Store over an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store one setting after checking it parses as a settings layer.
    pub async fn set(&self, owner: &str, key: &str, value: &str) -> DomainResult<()> {
        let candidate = HashMap::from([(key.to_string(), value.to_string())]);
        SettingsLayer::from_key_values(&candidate)?;
        if !SettingsLayer::is_known_key(key) {
            return Err(DomainError::ValidationFailed(format!("unknown setting: {key}")));
        }

        sqlx::query(
            r#"INSERT INTO user_settings (owner, key, value, updated_at) VALUES (?, ?, ?, ?)
               ON CONFLICT (owner, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(owner)
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a setting. Returns whether it existed.
    pub async fn unset(&self, owner: &str, key: &str) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM user_settings WHERE owner = ? AND key = ?")
            .bind(owner)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All settings of `owner`, sorted by key.
    pub async fn list(&self, owner: &str) -> DomainResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM user_settings WHERE owner = ? ORDER BY key")
                .bind(owner)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn get_all(&self, owner: &str) -> DomainResult<HashMap<String, String>> {
        Ok(self.list(owner).await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup_test_store() -> SqliteSettingsStore {
        SqliteSettingsStore::new(create_migrated_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_set_overwrites_and_scopes_by_owner() {
        let store = setup_test_store().await;
        store.set("alice", "max_iterations", "2").await.unwrap();
        store.set("alice", "max_iterations", "4").await.unwrap();
        store.set("bob", "verification_enabled", "false").await.unwrap();

        let alice = store.get_all("alice").await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice["max_iterations"], "4");
        assert!(store.get_all("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_rejects_bad_values() {
        let store = setup_test_store().await;
        assert!(store.set("alice", "max_iterations", "many").await.is_err());
        assert!(store.set("alice", "colour", "blue").await.is_err());
        assert!(store.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unset() {
        let store = setup_test_store().await;
        store.set("alice", "models.mid", "gpt-4o-mini").await.unwrap();
        assert!(store.unset("alice", "models.mid").await.unwrap());
        assert!(!store.unset("alice", "models.mid").await.unwrap());
    }
}
