//! Token and session storage.
//!
//! [`TokenStore`] and [`SessionStore`] are implemented identically by four
//! backends:
//!
//! | Backend | Module |
//! |---|---|
//! | in-memory maps | [`memory`] |
//! | PHP-serialized cache files | [`file`] |
//! | native SQL tables | [`sql`] |
//! | legacy site's `cache` table | [`legacy`] |
//!
//! The concrete backend is picked once at startup; engines only see
//! `Arc<dyn TokenStore>` / `Arc<dyn SessionStore>`.

pub mod file;
pub mod legacy;
pub mod memory;
pub mod record;
pub mod sql;

use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

use crate::auth::jwt::TokenSigner;
use crate::clock::Clock;
use crate::models::auth::{Session, Token, TokenKey};
use crate::php::PhpError;

/// How long a join session stays valid after it is stored.
pub const SESSION_TTL_SECS: i64 = 30;

/// [`SESSION_TTL_SECS`] as a duration.
pub fn session_ttl() -> Duration {
    Duration::seconds(SESSION_TTL_SECS)
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] PhpError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Persistence of issued access tokens.
///
/// Records are keyed by `(owner id, token id)` taken from the access
/// token's verified claims, never by the raw token text.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or replace a token.
    async fn store(&self, token: &Token) -> Result<(), StoreError>;

    /// Fetch a live token. Tokens whose claims fail verification are
    /// rejected without touching the backend; expired records are invisible.
    async fn get(&self, access_token: &str) -> Result<Option<Token>, StoreError>;

    /// Delete a token. Unknown tokens are ignored.
    async fn delete(&self, access_token: &str) -> Result<(), StoreError>;

    /// All live tokens of a user.
    async fn get_user_tokens(&self, owner_id: &str) -> Result<Vec<Token>, StoreError>;

    async fn delete_user_tokens(&self, owner_id: &str) -> Result<(), StoreError>;

    async fn get_user_token_count(&self, owner_id: &str) -> Result<usize, StoreError>;

    /// Remove expired records, returning how many were removed.
    async fn cleanup_expired(&self) -> Result<u64, StoreError>;
}

/// Persistence of pending server joins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a session for `server_id`, replacing any previous one. The store
    /// applies [`SESSION_TTL_SECS`] itself.
    async fn store(&self, server_id: &str, session: &Session) -> Result<(), StoreError>;

    /// Fetch a live session; expired sessions are invisible.
    async fn get(&self, server_id: &str) -> Result<Option<Session>, StoreError>;

    async fn delete(&self, server_id: &str) -> Result<(), StoreError>;

    /// Remove and return the live session for `server_id`. Of several
    /// concurrent callers at most one receives it.
    async fn take(&self, server_id: &str) -> Result<Option<Session>, StoreError>;

    /// Remove expired records, returning how many were removed.
    async fn cleanup_expired(&self) -> Result<u64, StoreError>;
}

/// Resolve an access token to its store key, or `None` if its claims do not
/// verify. This is the fast-reject path every backend runs first.
pub(crate) fn verified_key(
    signer: &TokenSigner,
    clock: &dyn Clock,
    access_token: &str,
) -> Option<TokenKey> {
    signer
        .verify(access_token, clock.now())
        .map(|claims| claims.key())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for backend tests.

    use std::sync::Arc;

    use chrono::{DateTime, Duration, SubsecRound, Utc};
    use uuid::Uuid;

    use crate::auth::jwt::TokenSigner;
    use crate::clock::ManualClock;
    use crate::models::auth::{Session, Token};

    pub fn clock() -> ManualClock {
        ManualClock::new(Utc::now().trunc_subsecs(0))
    }

    pub fn signer() -> Arc<TokenSigner> {
        Arc::new(TokenSigner::new(b"store-test-secret", Duration::days(3)))
    }

    /// Mint a token for `owner` valid for three days from `now`.
    pub fn token(signer: &TokenSigner, owner: &str, now: DateTime<Utc>) -> Token {
        let profile = Some(Uuid::new_v4());
        let minted = signer
            .mint(owner, profile, now)
            .expect("mint test token");
        Token {
            access_token: minted.access_token,
            client_token: Uuid::new_v4().simple().to_string(),
            owner_id: owner.to_string(),
            token_id: minted.token_id,
            profile_id: profile,
            created_at: now,
            expires_at: minted.expires_at,
        }
    }

    /// Pool for SQL backend tests, migrated. `None` (test skipped) unless
    /// `YGG_TEST_DATABASE_URL` is set.
    pub async fn pool() -> Option<sqlx::PgPool> {
        let url = std::env::var("YGG_TEST_DATABASE_URL").ok()?;
        let pool = sqlx::PgPool::connect(&url).await.expect("connect test database");
        crate::migrate::migrate(&pool).await.expect("migrate test database");
        Some(pool)
    }

    pub fn session(server_id: &str, now: DateTime<Utc>) -> Session {
        Session {
            server_id: server_id.to_string(),
            access_token: "access".into(),
            profile_id: Uuid::new_v4(),
            client_ip: Some("203.0.113.7".into()),
            created_at: now,
        }
    }
}
