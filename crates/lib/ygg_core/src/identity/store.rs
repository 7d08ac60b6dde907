//! Persistent name ↔ UUID mappings.
//!
//! A name is mapped at most once: [`UuidStore::insert_if_absent`] returns
//! whichever UUID won, so concurrent creators converge on one value.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::StoreError;

/// Storage of name ↔ UUID mappings.
#[async_trait]
pub trait UuidStore: Send + Sync {
    async fn uuid_of(&self, name: &str) -> Result<Option<Uuid>, StoreError>;

    async fn name_of(&self, uuid: Uuid) -> Result<Option<String>, StoreError>;

    /// Mappings for every name that has one.
    async fn uuids_of(&self, names: &[String]) -> Result<HashMap<String, Uuid>, StoreError>;

    /// Map `name` to `uuid` unless it is already mapped. Returns the UUID now
    /// stored for `name`.
    async fn insert_if_absent(&self, name: &str, uuid: Uuid) -> Result<Uuid, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Mappings {
    by_name: HashMap<String, Uuid>,
    by_uuid: HashMap<Uuid, String>,
}

/// Mappings held in process memory.
#[derive(Debug, Default)]
pub struct MemoryUuidStore {
    inner: RwLock<Mappings>,
}

impl MemoryUuidStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UuidStore for MemoryUuidStore {
    async fn uuid_of(&self, name: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self.inner.read().await.by_name.get(name).copied())
    }

    async fn name_of(&self, uuid: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().await.by_uuid.get(&uuid).cloned())
    }

    async fn uuids_of(&self, names: &[String]) -> Result<HashMap<String, Uuid>, StoreError> {
        let inner = self.inner.read().await;
        Ok(names
            .iter()
            .filter_map(|n| inner.by_name.get(n).map(|u| (n.clone(), *u)))
            .collect())
    }

    async fn insert_if_absent(&self, name: &str, uuid: Uuid) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.by_name.get(name) {
            return Ok(*existing);
        }
        inner.by_name.insert(name.to_string(), uuid);
        inner.by_uuid.insert(uuid, name.to_string());
        Ok(uuid)
    }
}

// ---------------------------------------------------------------------------
// Native SQL (`ygg_uuid_mappings`)
// ---------------------------------------------------------------------------

/// Mappings in the native `ygg_uuid_mappings` table (unique on `name`).
#[derive(Debug, Clone)]
pub struct SqlUuidStore {
    pool: PgPool,
}

impl SqlUuidStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UuidStore for SqlUuidStore {
    async fn uuid_of(&self, name: &str) -> Result<Option<Uuid>, StoreError> {
        let row = sqlx::query_scalar::<_, Uuid>("SELECT uuid FROM ygg_uuid_mappings WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn name_of(&self, uuid: Uuid) -> Result<Option<String>, StoreError> {
        let row = sqlx::query_scalar::<_, String>("SELECT name FROM ygg_uuid_mappings WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn uuids_of(&self, names: &[String]) -> Result<HashMap<String, Uuid>, StoreError> {
        let rows = sqlx::query_as::<_, (String, Uuid)>(
            "SELECT name, uuid FROM ygg_uuid_mappings WHERE name = ANY($1)",
        )
        .bind(names)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn insert_if_absent(&self, name: &str, uuid: Uuid) -> Result<Uuid, StoreError> {
        // The unique constraint on `name` arbitrates concurrent inserts.
        sqlx::query(
            "INSERT INTO ygg_uuid_mappings (name, uuid) VALUES ($1, $2) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        let winner = sqlx::query_scalar::<_, Uuid>("SELECT uuid FROM ygg_uuid_mappings WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(winner)
    }
}

// ---------------------------------------------------------------------------
// Legacy site (`uuid` table)
// ---------------------------------------------------------------------------

/// Mappings in the legacy site's `uuid` table, which stores unsigned UUIDs
/// and has no unique constraint on `name`.
#[derive(Debug, Clone)]
pub struct LegacyUuidStore {
    pool: PgPool,
}

impl LegacyUuidStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_legacy_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("uuid {raw:?}: {e}")))
}

#[async_trait]
impl UuidStore for LegacyUuidStore {
    async fn uuid_of(&self, name: &str) -> Result<Option<Uuid>, StoreError> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT uuid FROM \"uuid\" WHERE name = $1 ORDER BY id LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_deref().map(parse_legacy_uuid).transpose()
    }

    async fn name_of(&self, uuid: Uuid) -> Result<Option<String>, StoreError> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT name FROM \"uuid\" WHERE uuid = $1 ORDER BY id LIMIT 1",
        )
        .bind(uuid.simple().to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn uuids_of(&self, names: &[String]) -> Result<HashMap<String, Uuid>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT DISTINCT ON (name) name, uuid FROM \"uuid\" \
             WHERE name = ANY($1) ORDER BY name, id",
        )
        .bind(names)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(name, raw)| Ok((name, parse_legacy_uuid(&raw)?)))
            .collect()
    }

    async fn insert_if_absent(&self, name: &str, uuid: Uuid) -> Result<Uuid, StoreError> {
        // No unique constraint to lean on: serialize creators of the same
        // name with a transaction-scoped advisory lock.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let existing = sqlx::query_scalar::<_, String>(
            "SELECT uuid FROM \"uuid\" WHERE name = $1 ORDER BY id LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;
        let winner = match existing {
            Some(raw) => parse_legacy_uuid(&raw)?,
            None => {
                sqlx::query("INSERT INTO \"uuid\" (name, uuid) VALUES ($1, $2)")
                    .bind(name)
                    .bind(uuid.simple().to_string())
                    .execute(&mut *tx)
                    .await?;
                uuid
            }
        };
        tx.commit().await?;
        Ok(winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_first_insert_wins() {
        let store = MemoryUuidStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(store.insert_if_absent("Steve", a).await.unwrap(), a);
        assert_eq!(store.insert_if_absent("Steve", b).await.unwrap(), a);
        assert_eq!(store.uuid_of("Steve").await.unwrap(), Some(a));
        assert_eq!(store.name_of(a).await.unwrap(), Some("Steve".into()));
        assert_eq!(store.name_of(b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_batch_lookup_skips_unknown_names() {
        let store = MemoryUuidStore::new();
        let a = Uuid::new_v4();
        store.insert_if_absent("a", a).await.unwrap();
        let found = store
            .uuids_of(&["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], a);
    }
}
