//! Site-level key-value options.
//!
//! Holds settings the legacy site keeps in its `options` table, most
//! importantly the profile signing key in options-sourced deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::store::StoreError;

/// Option holding the PEM-encoded profile signing key.
pub const SIGNING_KEY_OPTION: &str = "ygg_private_key";

/// Option holding the public site URL.
pub const SITE_URL_OPTION: &str = "site_url";

/// Key-value option storage.
#[async_trait]
pub trait OptionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Options held in process memory.
#[derive(Debug, Default)]
pub struct MemoryOptions {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl OptionStore for MemoryOptions {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Options in the native `ygg_options` table.
#[derive(Debug, Clone)]
pub struct SqlOptions {
    pool: PgPool,
}

impl SqlOptions {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OptionStore for SqlOptions {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM ygg_options WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ygg_options (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Options in the legacy site's `options` table.
#[derive(Debug, Clone)]
pub struct LegacyOptions {
    pool: PgPool,
}

impl LegacyOptions {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OptionStore for LegacyOptions {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, Option<String>>(
            "SELECT option_value FROM options WHERE option_name = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value.flatten())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE options SET option_value = $2 WHERE option_name = $1")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            sqlx::query("INSERT INTO options (option_name, option_value) VALUES ($1, $2)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_options_round_trip() {
        let options = MemoryOptions::with_values([(SITE_URL_OPTION, "https://a.example")]);
        assert_eq!(
            options.get(SITE_URL_OPTION).await.unwrap().as_deref(),
            Some("https://a.example")
        );
        options.set(SITE_URL_OPTION, "https://b.example").await.unwrap();
        assert_eq!(
            options.get(SITE_URL_OPTION).await.unwrap().as_deref(),
            Some("https://b.example")
        );
        assert_eq!(options.get("missing").await.unwrap(), None);
    }
}
