//! File-backed token and session stores.
//!
//! Each record is one file named by the SHA-1 of its cache key, sharded into
//! two directory levels (`ab/cd/abcd…`). The body is a PHP-serialized value
//! followed by its unix expiry (see [`crate::php::encode_record`]). Writes go
//! to a temporary sibling and are renamed into place, so readers never see a
//! partial record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::record::{
    session_from_php, session_key, session_to_php, token_from_php, token_ids_from_php,
    token_ids_to_php, token_key, token_to_php, user_index_key,
};
use super::{SessionStore, StoreError, TokenStore, session_ttl, verified_key};
use crate::auth::jwt::TokenSigner;
use crate::clock::SharedClock;
use crate::models::auth::{Session, Token};
use crate::php::{PhpValue, decode_record, encode_record};

const TEMP_MARKER: &str = ".tmp-";

/// Age after which a leftover temporary file is treated as orphaned.
const TEMP_GRACE_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Cache directory
// ---------------------------------------------------------------------------

/// A directory of expiring PHP-serialized records.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let hash = hex::encode(Sha1::digest(key.as_bytes()));
        self.root.join(&hash[0..2]).join(&hash[2..4]).join(hash)
    }

    /// Read a live record. Missing, expired and undecodable records read as
    /// absent; undecodable ones are removed.
    pub async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<PhpValue>, StoreError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match decode_record(&bytes) {
            Ok((value, expires_at)) if expires_at > now.timestamp() => Ok(Some(value)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache file");
                remove_if_exists(&path).await?;
                Ok(None)
            }
        }
    }

    /// Write a record atomically.
    pub async fn put(&self, key: &str, value: &PhpValue, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let Some(dir) = path.parent() else {
            return Err(StoreError::Corrupt(format!("bad cache path {}", path.display())));
        };
        tokio::fs::create_dir_all(dir).await?;

        let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(format!("{TEMP_MARKER}{:016x}", rand::random::<u64>()));
        let temp = dir.join(temp_name);
        tokio::fs::write(&temp, encode_record(value, expires_at.timestamp())).await?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove a record. Missing records are ignored.
    pub async fn forget(&self, key: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.path_for(key)).await
    }

    /// Atomically claim and remove a live record. The file is renamed to a
    /// private name first, so of several concurrent callers only one reads it.
    pub async fn take(&self, key: &str, now: DateTime<Utc>) -> Result<Option<PhpValue>, StoreError> {
        let path = self.path_for(key);
        let mut claim_name = path.file_name().unwrap_or_default().to_os_string();
        claim_name.push(format!("{TEMP_MARKER}claim-{:016x}", rand::random::<u64>()));
        let claim = path.with_file_name(claim_name);
        match tokio::fs::rename(&path, &claim).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let bytes = tokio::fs::read(&claim).await;
        remove_if_exists(&claim).await?;
        match decode_record(&bytes?) {
            Ok((value, expires_at)) if expires_at > now.timestamp() => Ok(Some(value)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache file");
                Ok(None)
            }
        }
    }

    /// Remove every expired or undecodable record under the root, along with
    /// temporary files older than the grace period.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0;
        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    dirs.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().contains(TEMP_MARKER) {
                    if is_orphaned(&entry, now).await? {
                        remove_if_exists(&path).await?;
                        removed += 1;
                    }
                    continue;
                }
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    // Deleted concurrently.
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                let live = matches!(decode_record(&bytes), Ok((_, exp)) if exp > now.timestamp());
                if !live {
                    remove_if_exists(&path).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// Whether a temporary file was last written before the grace period.
async fn is_orphaned(entry: &tokio::fs::DirEntry, now: DateTime<Utc>) -> Result<bool, StoreError> {
    let modified = match entry.metadata().await {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let modified: DateTime<Utc> = modified.into();
    Ok(modified + Duration::seconds(TEMP_GRACE_SECS) < now)
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Tokens as cache files, plus one index record per user listing their
/// token ids.
pub struct FileTokenStore {
    cache: FileCache,
    signer: Arc<TokenSigner>,
    clock: SharedClock,
    /// Serializes read-modify-write of user index records.
    index_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(cache: FileCache, signer: Arc<TokenSigner>, clock: SharedClock) -> Self {
        Self {
            cache,
            signer,
            clock,
            index_lock: Mutex::new(()),
        }
    }

    async fn read_index(&self, owner_id: &str, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        Ok(self
            .cache
            .get(&user_index_key(owner_id), now)
            .await?
            .map(|v| token_ids_from_php(&v))
            .unwrap_or_default())
    }

    async fn write_index(&self, owner_id: &str, ids: &[String], now: DateTime<Utc>) -> Result<(), StoreError> {
        let key = user_index_key(owner_id);
        if ids.is_empty() {
            return self.cache.forget(&key).await;
        }
        // Every listed token was minted no later than now.
        let expires_at = now + self.signer.validity();
        self.cache.put(&key, &token_ids_to_php(ids), expires_at).await
    }

    async fn read_token(&self, owner_id: &str, token_id: &str, now: DateTime<Utc>) -> Result<Option<Token>, StoreError> {
        match self.cache.get(&token_key(owner_id, token_id), now).await? {
            Some(value) => Ok(Some(token_from_php(&value)?).filter(|t| !t.is_expired(now))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn store(&self, token: &Token) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.cache
            .put(
                &token_key(&token.owner_id, &token.token_id),
                &token_to_php(token),
                token.expires_at,
            )
            .await?;

        let _guard = self.index_lock.lock().await;
        let mut ids = self.read_index(&token.owner_id, now).await?;
        if !ids.contains(&token.token_id) {
            ids.push(token.token_id.clone());
        }
        self.write_index(&token.owner_id, &ids, now).await
    }

    async fn get(&self, access_token: &str) -> Result<Option<Token>, StoreError> {
        let Some(key) = verified_key(&self.signer, self.clock.as_ref(), access_token) else {
            return Ok(None);
        };
        let token = self
            .read_token(&key.owner_id, &key.token_id, self.clock.now())
            .await?;
        Ok(token.filter(|t| t.access_token == access_token))
    }

    async fn delete(&self, access_token: &str) -> Result<(), StoreError> {
        let Some(key) = verified_key(&self.signer, self.clock.as_ref(), access_token) else {
            return Ok(());
        };
        self.cache.forget(&token_key(&key.owner_id, &key.token_id)).await?;

        let now = self.clock.now();
        let _guard = self.index_lock.lock().await;
        let mut ids = self.read_index(&key.owner_id, now).await?;
        let before = ids.len();
        ids.retain(|id| *id != key.token_id);
        if ids.len() != before {
            self.write_index(&key.owner_id, &ids, now).await?;
        }
        Ok(())
    }

    async fn get_user_tokens(&self, owner_id: &str) -> Result<Vec<Token>, StoreError> {
        let now = self.clock.now();
        let _guard = self.index_lock.lock().await;
        let ids = self.read_index(owner_id, now).await?;

        let mut tokens = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(token) = self.read_token(owner_id, id, now).await? {
                tokens.push(token);
            }
        }
        if tokens.len() != ids.len() {
            let live: Vec<String> = tokens.iter().map(|t| t.token_id.clone()).collect();
            debug!(owner_id, pruned = ids.len() - live.len(), "pruned stale token ids");
            self.write_index(owner_id, &live, now).await?;
        }
        Ok(tokens)
    }

    async fn delete_user_tokens(&self, owner_id: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let _guard = self.index_lock.lock().await;
        for id in self.read_index(owner_id, now).await? {
            self.cache.forget(&token_key(owner_id, &id)).await?;
        }
        self.cache.forget(&user_index_key(owner_id)).await
    }

    async fn get_user_token_count(&self, owner_id: &str) -> Result<usize, StoreError> {
        Ok(self.get_user_tokens(owner_id).await?.len())
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        self.cache.sweep(self.clock.now()).await
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub struct FileSessionStore {
    cache: FileCache,
    clock: SharedClock,
}

impl FileSessionStore {
    pub fn new(cache: FileCache, clock: SharedClock) -> Self {
        Self { cache, clock }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
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
        self.cache.sweep(self.clock.now()).await
    }
}
