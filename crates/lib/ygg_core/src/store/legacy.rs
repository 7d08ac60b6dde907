//! Token and session stores on the legacy site's `cache` table.
//!
//! The table is the site framework's database cache: `key` (unique),
//! `value` holding a PHP-serialized payload and `expiration` in unix
//! seconds. Records written here are readable by the site and the reverse.
//! Keys carry the site's cache prefix.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, warn};

use super::record::{
    session_from_php, session_key, session_to_php, token_from_php, token_ids_from_php,
    token_ids_to_php, token_key, token_to_php, user_index_key,
};
use super::{SessionStore, StoreError, TokenStore, session_ttl, verified_key};
use crate::auth::jwt::TokenSigner;
use crate::clock::SharedClock;
use crate::models::auth::{Session, Token};
use crate::php::{PhpValue, serialize, unserialize};

/// Rows deleted per statement during a sweep.
const SWEEP_BATCH: i64 = 1000;

/// Key prefix the site's cache uses by default.
pub const DEFAULT_CACHE_PREFIX: &str = "laravel_cache";

// ---------------------------------------------------------------------------
// Cache table
// ---------------------------------------------------------------------------

/// `expiration` is a 32-bit column; later instants cannot be stored.
fn expiration_column(expires_at: DateTime<Utc>) -> Result<i32, StoreError> {
    i32::try_from(expires_at.timestamp())
        .map_err(|_| StoreError::Corrupt(format!("expiry {expires_at} does not fit the cache table")))
}

/// Expiring PHP-serialized records in the `cache` table.
#[derive(Debug, Clone)]
pub struct LegacyCache {
    pool: PgPool,
    prefix: String,
}

impl LegacyCache {
    pub fn new(pool: PgPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    async fn read(
        &self,
        conn: &mut PgConnection,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PhpValue>, StoreError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT value, expiration::BIGINT FROM cache WHERE key = $1",
        )
        .bind(self.full_key(key))
        .fetch_optional(conn)
        .await?;
        let Some((value, expiration)) = row else {
            return Ok(None);
        };
        if expiration <= now.timestamp() {
            return Ok(None);
        }
        match unserialize(value.as_bytes()) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "ignoring undecodable cache row");
                Ok(None)
            }
        }
    }

    async fn write(
        &self,
        conn: &mut PgConnection,
        key: &str,
        value: &PhpValue,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let payload = String::from_utf8(serialize(value))
            .map_err(|e| StoreError::Corrupt(format!("non-UTF-8 payload for {key}: {e}")))?;
        sqlx::query(
            "INSERT INTO cache (key, value, expiration) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expiration = EXCLUDED.expiration",
        )
        .bind(self.full_key(key))
        .bind(payload)
        .bind(expiration_column(expires_at)?)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn remove(&self, conn: &mut PgConnection, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cache WHERE key = $1")
            .bind(self.full_key(key))
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Delete a record and return it if it was live. Of several concurrent
    /// callers only one gets the row back.
    pub async fn take(&self, key: &str, now: DateTime<Utc>) -> Result<Option<PhpValue>, StoreError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "DELETE FROM cache WHERE key = $1 RETURNING value, expiration::BIGINT",
        )
        .bind(self.full_key(key))
        .fetch_optional(&self.pool)
        .await?;
        let Some((value, _)) = row.filter(|(_, exp)| *exp > now.timestamp()) else {
            return Ok(None);
        };
        match unserialize(value.as_bytes()) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache row");
                Ok(None)
            }
        }
    }

    pub async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<PhpValue>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        self.read(&mut conn, key, now).await
    }

    pub async fn put(&self, key: &str, value: &PhpValue, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        self.write(&mut conn, key, value, expires_at).await
    }

    pub async fn forget(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        self.remove(&mut conn, key).await
    }

    /// Delete expired rows whose key starts with one of `prefixes`.
    pub async fn sweep(&self, prefixes: &[&str], now: DateTime<Utc>) -> Result<u64, StoreError> {
        let patterns: Vec<String> = prefixes
            .iter()
            .map(|p| format!("{}{p}%", self.prefix))
            .collect();
        let mut removed = 0;
        loop {
            let deleted = sqlx::query(
                "DELETE FROM cache WHERE ctid IN \
                 (SELECT ctid FROM cache WHERE key LIKE ANY($1) AND expiration <= $2 LIMIT $3)",
            )
            .bind(&patterns)
            .bind(now.timestamp())
            .bind(SWEEP_BATCH)
            .execute(&self.pool)
            .await?
            .rows_affected();
            removed += deleted;
            if deleted < SWEEP_BATCH as u64 {
                break;
            }
        }
        if removed > 0 {
            debug!(removed, "swept expired cache rows");
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Tokens as cache rows, plus one index row per user listing their token
/// ids. Index updates run in a transaction holding an advisory lock on the
/// index key.
pub struct LegacyTokenStore {
    cache: LegacyCache,
    signer: Arc<TokenSigner>,
    clock: SharedClock,
}

impl LegacyTokenStore {
    pub fn new(cache: LegacyCache, signer: Arc<TokenSigner>, clock: SharedClock) -> Self {
        Self { cache, signer, clock }
    }

    async fn lock_index(&self, conn: &mut PgConnection, owner_id: &str) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(self.cache.full_key(&user_index_key(owner_id)))
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn read_index(
        &self,
        conn: &mut PgConnection,
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .cache
            .read(conn, &user_index_key(owner_id), now)
            .await?
            .map(|v| token_ids_from_php(&v))
            .unwrap_or_default())
    }

    async fn write_index(
        &self,
        conn: &mut PgConnection,
        owner_id: &str,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = user_index_key(owner_id);
        if ids.is_empty() {
            return self.cache.remove(conn, &key).await;
        }
        let expires_at = now + self.signer.validity();
        self.cache.write(conn, &key, &token_ids_to_php(ids), expires_at).await
    }

    async fn read_token(
        &self,
        conn: &mut PgConnection,
        owner_id: &str,
        token_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError> {
        match self.cache.read(conn, &token_key(owner_id, token_id), now).await? {
            Some(value) => Ok(Some(token_from_php(&value)?).filter(|t| !t.is_expired(now))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TokenStore for LegacyTokenStore {
    async fn store(&self, token: &Token) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut tx = self.cache.pool.begin().await?;
        self.cache
            .write(
                &mut tx,
                &token_key(&token.owner_id, &token.token_id),
                &token_to_php(token),
                token.expires_at,
            )
            .await?;
        self.lock_index(&mut tx, &token.owner_id).await?;
        let mut ids = self.read_index(&mut tx, &token.owner_id, now).await?;
        if !ids.contains(&token.token_id) {
            ids.push(token.token_id.clone());
        }
        self.write_index(&mut tx, &token.owner_id, &ids, now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, access_token: &str) -> Result<Option<Token>, StoreError> {
        let Some(key) = verified_key(&self.signer, self.clock.as_ref(), access_token) else {
            return Ok(None);
        };
        let mut conn = self.cache.pool.acquire().await?;
        let token = self
            .read_token(&mut conn, &key.owner_id, &key.token_id, self.clock.now())
            .await?;
        Ok(token.filter(|t| t.access_token == access_token))
    }

    async fn delete(&self, access_token: &str) -> Result<(), StoreError> {
        let Some(key) = verified_key(&self.signer, self.clock.as_ref(), access_token) else {
            return Ok(());
        };
        let now = self.clock.now();
        let mut tx = self.cache.pool.begin().await?;
        self.cache
            .remove(&mut tx, &token_key(&key.owner_id, &key.token_id))
            .await?;
        self.lock_index(&mut tx, &key.owner_id).await?;
        let mut ids = self.read_index(&mut tx, &key.owner_id, now).await?;
        let before = ids.len();
        ids.retain(|id| *id != key.token_id);
        if ids.len() != before {
            self.write_index(&mut tx, &key.owner_id, &ids, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_user_tokens(&self, owner_id: &str) -> Result<Vec<Token>, StoreError> {
        let now = self.clock.now();
        let mut tx = self.cache.pool.begin().await?;
        self.lock_index(&mut tx, owner_id).await?;
        let ids = self.read_index(&mut tx, owner_id, now).await?;

        let mut tokens = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(token) = self.read_token(&mut tx, owner_id, id, now).await? {
                tokens.push(token);
            }
        }
        if tokens.len() != ids.len() {
            let live: Vec<String> = tokens.iter().map(|t| t.token_id.clone()).collect();
            self.write_index(&mut tx, owner_id, &live, now).await?;
        }
        tx.commit().await?;
        Ok(tokens)
    }

    async fn delete_user_tokens(&self, owner_id: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut tx = self.cache.pool.begin().await?;
        self.lock_index(&mut tx, owner_id).await?;
        for id in self.read_index(&mut tx, owner_id, now).await? {
            self.cache.remove(&mut tx, &token_key(owner_id, &id)).await?;
        }
        self.cache.remove(&mut tx, &user_index_key(owner_id)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_user_token_count(&self, owner_id: &str) -> Result<usize, StoreError> {
        Ok(self.get_user_tokens(owner_id).await?.len())
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        self.cache
            .sweep(&["yggdrasil-token-", "yggdrasil-user-"], self.clock.now())
            .await
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub struct LegacySessionStore {
    cache: LegacyCache,
    clock: SharedClock,
}

impl LegacySessionStore {
    pub fn new(cache: LegacyCache, clock: SharedClock) -> Self {
        Self { cache, clock }
    }
}

#[async_trait]
impl SessionStore for LegacySessionStore {
    async fn store(&self, server_id: &str, session: &Session) -> Result<(), StoreError> {
        let expires_at = self.clock.now() + session_ttl();
        self.cache
            .put(&session_key(server_id), &session_to_php(session), expires_at)
            .await
    }

    async fn get(&self, server_id: &str) -> Result<Option<Session>, StoreError> {
        match self.cache.get(&session_key(server_id), self.clock.now()).await? {
            Some(value) => Ok(Some(session_from_php(&value)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, server_id: &str) -> Result<(), StoreError> {
        self.cache.forget(&session_key(server_id)).await
    }

    async fn take(&self, server_id: &str) -> Result<Option<Session>, StoreError> {
        match self.cache.take(&session_key(server_id), self.clock.now()).await? {
            Some(value) => Ok(Some(session_from_php(&value)?)),
            None => Ok(None),
        }
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        self.cache.sweep(&["yggdrasil-server-"], self.clock.now()).await
    }
}
