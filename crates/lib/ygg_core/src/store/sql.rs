//! Token and session stores on the native `ygg_tokens` / `ygg_sessions`
//! tables.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{SessionStore, StoreError, TokenStore, session_ttl, verified_key};
use crate::auth::jwt::TokenSigner;
use crate::clock::SharedClock;
use crate::models::auth::{Session, Token};

/// Rows deleted per statement during a sweep.
const SWEEP_BATCH: i64 = 1000;

type TokenRow = (String, String, String, String, Option<Uuid>, DateTime<Utc>, DateTime<Utc>);

const TOKEN_COLUMNS: &str =
    "access_token, client_token, user_id, token_id, profile_id, created_at, expires_at";

fn token_from_row(row: TokenRow) -> Token {
    let (access_token, client_token, owner_id, token_id, profile_id, created_at, expires_at) = row;
    Token {
        access_token,
        client_token,
        owner_id,
        token_id,
        profile_id,
        created_at,
        expires_at,
    }
}

/// Delete expired rows of `table` in batches until none remain.
async fn sweep_table(pool: &PgPool, table: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
    let sql = format!(
        "DELETE FROM {table} WHERE ctid IN \
         (SELECT ctid FROM {table} WHERE expires_at <= $1 LIMIT $2)"
    );
    let mut removed = 0;
    loop {
        let deleted = sqlx::query(&sql)
            .bind(now)
            .bind(SWEEP_BATCH)
            .execute(pool)
            .await?
            .rows_affected();
        removed += deleted;
        if deleted < SWEEP_BATCH as u64 {
            break;
        }
    }
    if removed > 0 {
        debug!(table, removed, "swept expired rows");
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqlTokenStore {
    pool: PgPool,
    signer: Arc<TokenSigner>,
    clock: SharedClock,
}

impl SqlTokenStore {
    pub fn new(pool: PgPool, signer: Arc<TokenSigner>, clock: SharedClock) -> Self {
        Self { pool, signer, clock }
    }
}

#[async_trait]
impl TokenStore for SqlTokenStore {
    async fn store(&self, token: &Token) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ygg_tokens \
             (user_id, token_id, access_token, client_token, profile_id, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, token_id) DO UPDATE SET \
             access_token = EXCLUDED.access_token, client_token = EXCLUDED.client_token, \
             profile_id = EXCLUDED.profile_id, created_at = EXCLUDED.created_at, \
             expires_at = EXCLUDED.expires_at",
        )
        .bind(&token.owner_id)
        .bind(&token.token_id)
        .bind(&token.access_token)
        .bind(&token.client_token)
        .bind(token.profile_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, access_token: &str) -> Result<Option<Token>, StoreError> {
        let Some(key) = verified_key(&self.signer, self.clock.as_ref(), access_token) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM ygg_tokens \
             WHERE user_id = $1 AND token_id = $2 AND access_token = $3 AND expires_at > $4"
        ))
        .bind(&key.owner_id)
        .bind(&key.token_id)
        .bind(access_token)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(token_from_row))
    }

    async fn delete(&self, access_token: &str) -> Result<(), StoreError> {
        let Some(key) = verified_key(&self.signer, self.clock.as_ref(), access_token) else {
            return Ok(());
        };
        sqlx::query("DELETE FROM ygg_tokens WHERE user_id = $1 AND token_id = $2")
            .bind(&key.owner_id)
            .bind(&key.token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_user_tokens(&self, owner_id: &str) -> Result<Vec<Token>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM ygg_tokens \
             WHERE user_id = $1 AND expires_at > $2 ORDER BY created_at, token_id"
        ))
        .bind(owner_id)
        .bind(self.clock.now())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(token_from_row).collect())
    }

    async fn delete_user_tokens(&self, owner_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM ygg_tokens WHERE user_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_user_token_count(&self, owner_id: &str) -> Result<usize, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ygg_tokens WHERE user_id = $1 AND expires_at > $2",
        )
        .bind(owner_id)
        .bind(self.clock.now())
        .fetch_one(&self.pool)
        .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        sweep_table(&self.pool, "ygg_tokens", self.clock.now()).await
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

type SessionRow = (String, String, Uuid, Option<String>, DateTime<Utc>);

const SESSION_COLUMNS: &str = "server_id, access_token, profile_id, client_ip, created_at";

fn session_from_row(row: SessionRow) -> Session {
    let (server_id, access_token, profile_id, client_ip, created_at) = row;
    Session {
        server_id,
        access_token,
        profile_id,
        client_ip,
        created_at,
    }
}

#[derive(Clone)]
pub struct SqlSessionStore {
    pool: PgPool,
    clock: SharedClock,
}

impl SqlSessionStore {
    pub fn new(pool: PgPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn store(&self, server_id: &str, session: &Session) -> Result<(), StoreError> {
        let expires_at = self.clock.now() + session_ttl();
        sqlx::query(
            "INSERT INTO ygg_sessions \
             (server_id, access_token, profile_id, client_ip, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (server_id) DO UPDATE SET \
             access_token = EXCLUDED.access_token, profile_id = EXCLUDED.profile_id, \
             client_ip = EXCLUDED.client_ip, created_at = EXCLUDED.created_at, \
             expires_at = EXCLUDED.expires_at",
        )
        .bind(server_id)
        .bind(&session.access_token)
        .bind(session.profile_id)
        .bind(&session.client_ip)
        .bind(session.created_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, server_id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM ygg_sessions WHERE server_id = $1 AND expires_at > $2"
        ))
        .bind(server_id)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(session_from_row))
    }

    async fn delete(&self, server_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM ygg_sessions WHERE server_id = $1")
            .bind(server_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn take(&self, server_id: &str) -> Result<Option<Session>, StoreError> {
        // The row lock taken by DELETE lets exactly one statement return it.
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "DELETE FROM ygg_sessions WHERE server_id = $1 AND expires_at > $2 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(server_id)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(session_from_row))
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        sweep_table(&self.pool, "ygg_sessions", self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::clock::Clock;
    use crate::store::testing;

    #[tokio::test]
    async fn token_lifecycle() {
        let Some(pool) = testing::pool().await else {
            return;
        };
        let clock = testing::clock();
        let signer = testing::signer();
        let store = SqlTokenStore::new(pool, signer.clone(), Arc::new(clock.clone()));
        let owner = Uuid::new_v4().to_string();

        let token = testing::token(&signer, &owner, clock.now());
        store.store(&token).await.unwrap();
        assert_eq!(store.get(&token.access_token).await.unwrap(), Some(token.clone()));
        assert_eq!(store.get_user_token_count(&owner).await.unwrap(), 1);

        store.delete(&token.access_token).await.unwrap();
        store.delete(&token.access_token).await.unwrap();
        assert_eq!(store.get(&token.access_token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_tokens_are_hidden_then_swept() {
        let Some(pool) = testing::pool().await else {
            return;
        };
        let clock = testing::clock();
        let signer = testing::signer();
        let store = SqlTokenStore::new(pool, signer.clone(), Arc::new(clock.clone()));
        let owner = Uuid::new_v4().to_string();

        let mut short = testing::token(&signer, &owner, clock.now());
        short.expires_at = clock.now() + Duration::minutes(1);
        let long = testing::token(&signer, &owner, clock.now());
        store.store(&short).await.unwrap();
        store.store(&long).await.unwrap();

        clock.advance(Duration::minutes(2));
        assert_eq!(store.get_user_tokens(&owner).await.unwrap(), vec![long]);
        assert!(store.cleanup_expired().await.unwrap() >= 1);

        store.delete_user_tokens(&owner).await.unwrap();
        assert_eq!(store.get_user_token_count(&owner).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn session_is_replaced_and_expires() {
        let Some(pool) = testing::pool().await else {
            return;
        };
        let clock = testing::clock();
        let store = SqlSessionStore::new(pool, Arc::new(clock.clone()));
        let server_id = Uuid::new_v4().simple().to_string();

        let first = testing::session(&server_id, clock.now());
        let second = testing::session(&server_id, clock.now());
        store.store(&server_id, &first).await.unwrap();
        store.store(&server_id, &second).await.unwrap();
        assert_eq!(store.get(&server_id).await.unwrap(), Some(second));

        clock.advance(session_ttl());
        assert_eq!(store.get(&server_id).await.unwrap(), None);
        store.delete(&server_id).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_takes_return_the_session_once() {
        let Some(pool) = testing::pool().await else {
            return;
        };
        let clock = testing::clock();
        let store = Arc::new(SqlSessionStore::new(pool, Arc::new(clock.clone())));
        let server_id = Uuid::new_v4().simple().to_string();
        let session = testing::session(&server_id, clock.now());
        store.store(&server_id, &session).await.unwrap();

        let takers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let server_id = server_id.clone();
                tokio::spawn(async move { store.take(&server_id).await.unwrap() })
            })
            .collect();
        let mut taken = Vec::new();
        for taker in takers {
            taken.extend(taker.await.unwrap());
        }
        assert_eq!(taken, vec![session]);
        assert_eq!(store.take(&server_id).await.unwrap(), None);
    }
}
