//! Player identity: name → UUID derivation and the persistent mapping.
//!
//! In offline mode a name's UUID is `MD5("OfflinePlayer:" + name)` with the
//! version nibble forced to 3 and the RFC 4122 variant bits set. Offline-mode
//! game clients compute the same value locally, so it must match bit for bit.

pub mod cache;
pub mod store;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use md5::{Digest, Md5};
use tracing::debug;
use uuid::Uuid;

use self::cache::NameUuidCache;
use self::store::UuidStore;
use crate::store::StoreError;

/// How new profile UUIDs are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UuidMode {
    /// Deterministic offline-mode UUID.
    #[default]
    Offline,
    /// Random v4 UUID.
    Random,
}

impl FromStr for UuidMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offline" => Ok(UuidMode::Offline),
            "random" => Ok(UuidMode::Random),
            other => Err(format!("unknown uuid mode: {other}")),
        }
    }
}

/// The UUID an offline-mode client derives for `name`.
pub fn offline_uuid(name: &str) -> Uuid {
    let digest = Md5::digest(format!("OfflinePlayer:{name}"));
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    bytes[6] = (bytes[6] & 0x0f) | 0x30;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

/// Resolves player names to stable UUIDs, creating mappings on first use.
pub struct IdentityDeriver {
    mode: UuidMode,
    store: Arc<dyn UuidStore>,
    cache: Mutex<NameUuidCache>,
    /// Serializes mapping creation within this process.
    create_lock: tokio::sync::Mutex<()>,
}

impl IdentityDeriver {
    pub fn new(mode: UuidMode, store: Arc<dyn UuidStore>) -> Self {
        Self::with_capacity(mode, store, cache::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(mode: UuidMode, store: Arc<dyn UuidStore>, capacity: usize) -> Self {
        Self {
            mode,
            store,
            cache: Mutex::new(NameUuidCache::new(capacity)),
            create_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn mode(&self) -> UuidMode {
        self.mode
    }

    /// A fresh UUID for `name` under the configured mode. Does not consult or
    /// update the mapping.
    pub fn derive_uuid(&self, name: &str) -> Uuid {
        match self.mode {
            UuidMode::Offline => offline_uuid(name),
            UuidMode::Random => Uuid::new_v4(),
        }
    }

    fn cached_uuid(&self, name: &str) -> Option<Uuid> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .uuid_of(name)
    }

    fn remember(&self, name: &str, uuid: Uuid) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, uuid);
    }

    /// Existing mapping for `name`, without creating one.
    pub async fn lookup(&self, name: &str) -> Result<Option<Uuid>, StoreError> {
        if let Some(uuid) = self.cached_uuid(name) {
            return Ok(Some(uuid));
        }
        let found = self.store.uuid_of(name).await?;
        if let Some(uuid) = found {
            self.remember(name, uuid);
        }
        Ok(found)
    }

    /// Name mapped to `uuid`, if any.
    pub async fn name_of(&self, uuid: Uuid) -> Result<Option<String>, StoreError> {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .name_of(&uuid);
        if cached.is_some() {
            return Ok(cached);
        }
        let found = self.store.name_of(uuid).await?;
        if let Some(name) = &found {
            self.remember(name, uuid);
        }
        Ok(found)
    }

    /// UUID for `name`, creating and persisting the mapping if absent.
    pub async fn get_or_create(&self, name: &str) -> Result<Uuid, StoreError> {
        if let Some(uuid) = self.lookup(name).await? {
            return Ok(uuid);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(uuid) = self.store.uuid_of(name).await? {
            self.remember(name, uuid);
            return Ok(uuid);
        }
        let uuid = self
            .store
            .insert_if_absent(name, self.derive_uuid(name))
            .await?;
        debug!(name, %uuid, "created uuid mapping");
        self.remember(name, uuid);
        Ok(uuid)
    }

    /// [`get_or_create`](Self::get_or_create) for many names at once.
    pub async fn get_or_create_batch(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, Uuid>, StoreError> {
        let mut resolved = HashMap::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            if resolved.contains_key(name) || missing.contains(name) {
                continue;
            }
            match self.cached_uuid(name) {
                Some(uuid) => {
                    resolved.insert(name.clone(), uuid);
                }
                None => missing.push(name.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(resolved);
        }

        let found = self.store.uuids_of(&missing).await?;
        for (name, uuid) in &found {
            self.remember(name, *uuid);
        }
        resolved.extend(found);
        missing.retain(|n| !resolved.contains_key(n));
        if missing.is_empty() {
            return Ok(resolved);
        }

        let _guard = self.create_lock.lock().await;
        let found = self.store.uuids_of(&missing).await?;
        for name in missing {
            let uuid = match found.get(&name) {
                Some(uuid) => *uuid,
                None => {
                    self.store
                        .insert_if_absent(&name, self.derive_uuid(&name))
                        .await?
                }
            };
            self.remember(&name, uuid);
            resolved.insert(name, uuid);
        }
        Ok(resolved)
    }
}
