//! In-memory token and session stores.
//!
//! One map per store behind a reader/writer lock: reads take the read lock,
//! mutations the write lock.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{SessionStore, StoreError, TokenStore, session_ttl, verified_key};
use crate::auth::jwt::TokenSigner;
use crate::clock::SharedClock;
use crate::models::auth::{Session, Token, TokenKey};

/// Keys removed per write-lock acquisition during a sweep.
const SWEEP_BATCH: usize = 512;

/// Tokens ordered by `(owner, token id)` so a user's tokens are one range.
pub struct MemoryTokenStore {
    tokens: RwLock<BTreeMap<TokenKey, Token>>,
    signer: Arc<TokenSigner>,
    clock: SharedClock,
}

impl MemoryTokenStore {
    pub fn new(signer: Arc<TokenSigner>, clock: SharedClock) -> Self {
        Self {
            tokens: RwLock::new(BTreeMap::new()),
            signer,
            clock,
        }
    }
}

fn owner_range(owner_id: &str) -> (Bound<TokenKey>, Bound<TokenKey>) {
    (
        Bound::Included(TokenKey {
            owner_id: owner_id.to_string(),
            token_id: String::new(),
        }),
        Bound::Unbounded,
    )
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store(&self, token: &Token) -> Result<(), StoreError> {
        self.tokens.write().await.insert(token.key(), token.clone());
        Ok(())
    }

    async fn get(&self, access_token: &str) -> Result<Option<Token>, StoreError> {
        let Some(key) = verified_key(&self.signer, self.clock.as_ref(), access_token) else {
            return Ok(None);
        };
        let now = self.clock.now();
        let tokens = self.tokens.read().await;
        Ok(tokens
            .get(&key)
            .filter(|t| !t.is_expired(now) && t.access_token == access_token)
            .cloned())
    }

    async fn delete(&self, access_token: &str) -> Result<(), StoreError> {
        if let Some(key) = verified_key(&self.signer, self.clock.as_ref(), access_token) {
            self.tokens.write().await.remove(&key);
        }
        Ok(())
    }

    async fn get_user_tokens(&self, owner_id: &str) -> Result<Vec<Token>, StoreError> {
        let now = self.clock.now();
        let tokens = self.tokens.read().await;
        Ok(tokens
            .range(owner_range(owner_id))
            .take_while(|(k, _)| k.owner_id == owner_id)
            .filter(|(_, t)| !t.is_expired(now))
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn delete_user_tokens(&self, owner_id: &str) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write().await;
        let keys: Vec<TokenKey> = tokens
            .range(owner_range(owner_id))
            .take_while(|(k, _)| k.owner_id == owner_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            tokens.remove(&key);
        }
        Ok(())
    }

    async fn get_user_token_count(&self, owner_id: &str) -> Result<usize, StoreError> {
        Ok(self.get_user_tokens(owner_id).await?.len())
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let expired: Vec<TokenKey> = self
            .tokens
            .read()
            .await
            .iter()
            .filter(|(_, t)| t.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = 0;
        for batch in expired.chunks(SWEEP_BATCH) {
            let mut tokens = self.tokens.write().await;
            for key in batch {
                // Re-check: the key may have been stored again since the scan.
                if tokens.get(key).is_some_and(|t| t.is_expired(now)) {
                    tokens.remove(key);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "swept expired tokens");
        }
        Ok(removed)
    }
}

/// Sessions keyed by server id, each with the expiry set at store time.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, (Session, DateTime<Utc>)>>,
    clock: SharedClock,
}

impl MemorySessionStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn store(&self, server_id: &str, session: &Session) -> Result<(), StoreError> {
        let expires_at = self.clock.now() + session_ttl();
        self.sessions
            .write()
            .await
            .insert(server_id.to_string(), (session.clone(), expires_at));
        Ok(())
    }

    async fn get(&self, server_id: &str) -> Result<Option<Session>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .sessions
            .read()
            .await
            .get(server_id)
            .filter(|(_, expires_at)| now < *expires_at)
            .map(|(s, _)| s.clone()))
    }

    async fn delete(&self, server_id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(server_id);
        Ok(())
    }

    async fn take(&self, server_id: &str) -> Result<Option<Session>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .sessions
            .write()
            .await
            .remove(server_id)
            .filter(|(_, expires_at)| now < *expires_at)
            .map(|(s, _)| s))
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, (_, expires_at))| now >= *expires_at)
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = 0;
        for batch in expired.chunks(SWEEP_BATCH) {
            let mut sessions = self.sessions.write().await;
            for key in batch {
                if sessions.get(key).is_some_and(|(_, exp)| now >= *exp) {
                    sessions.remove(key);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
