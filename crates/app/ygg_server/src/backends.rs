//! Backend selection and wiring.

use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use ygg_core::auth::jwt::TokenSigner;
use ygg_core::auth::password::CredentialVerifier;
use ygg_core::clock::SharedClock;
use ygg_core::identity::store::{LegacyUuidStore, MemoryUuidStore, SqlUuidStore, UuidStore};
use ygg_core::identity::{IdentityDeriver, UuidMode};
use ygg_core::options::{LegacyOptions, MemoryOptions, OptionStore, SqlOptions};
use ygg_core::profiles::ProfileLookup;
use ygg_core::profiles::legacy::LegacyProfiles;
use ygg_core::profiles::memory::MemoryProfiles;
use ygg_core::profiles::sql::SqlProfiles;
use ygg_core::store::file::{FileCache, FileSessionStore, FileTokenStore};
use ygg_core::store::legacy::{LegacyCache, LegacySessionStore, LegacyTokenStore};
use ygg_core::store::memory::{MemorySessionStore, MemoryTokenStore};
use ygg_core::store::sql::{SqlSessionStore, SqlTokenStore};
use ygg_core::store::{SessionStore, TokenStore};

type BoxError = Box<dyn std::error::Error>;

/// Where tokens and sessions live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    Memory,
    File,
    Database,
    Legacy,
}

/// Where users, profiles and options live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProfileBackend {
    Memory,
    Database,
    Legacy,
}

/// Connection details shared by the database-backed choices.
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
}

/// Settings for the key-value token backends.
pub struct CacheSettings {
    pub dir: PathBuf,
    pub prefix: String,
}

/// A demo account for the in-memory profile backend, `email:password:name`.
#[derive(Debug, Clone)]
pub struct DemoUser {
    pub email: String,
    pub password: String,
    pub profile: String,
}

impl std::str::FromStr for DemoUser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(email), Some(password), Some(profile))
                if !email.is_empty() && !profile.is_empty() =>
            {
                Ok(Self {
                    email: email.to_string(),
                    password: password.to_string(),
                    profile: profile.to_string(),
                })
            }
            _ => Err(format!("expected email:password:profile, got {s:?}")),
        }
    }
}

/// Open the pool when any chosen backend needs one, running the native
/// migrations when the native schema is in use.
pub async fn connect(
    storage: StorageBackend,
    profiles: ProfileBackend,
    db: &DatabaseSettings,
) -> Result<Option<PgPool>, BoxError> {
    let native = storage == StorageBackend::Database || profiles == ProfileBackend::Database;
    let legacy = storage == StorageBackend::Legacy || profiles == ProfileBackend::Legacy;
    if !native && !legacy {
        return Ok(None);
    }
    let url = db
        .url
        .as_deref()
        .ok_or("a database URL is required for database or legacy backends")?;

    info!(max_connections = db.max_connections, "connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(url)
        .await?;

    if native {
        info!("running database migrations");
        ygg_core::migrate::migrate(&pool).await?;
    }
    Ok(Some(pool))
}

fn require(pool: &Option<PgPool>) -> Result<PgPool, BoxError> {
    pool.clone().ok_or_else(|| "database pool not connected".into())
}

/// Build the token and session stores.
pub fn token_stores(
    backend: StorageBackend,
    pool: &Option<PgPool>,
    cache: &CacheSettings,
    signer: Arc<TokenSigner>,
    clock: SharedClock,
) -> Result<(Arc<dyn TokenStore>, Arc<dyn SessionStore>), BoxError> {
    info!(backend = ?backend, "token storage");
    Ok(match backend {
        StorageBackend::Memory => (
            Arc::new(MemoryTokenStore::new(signer, clock.clone())),
            Arc::new(MemorySessionStore::new(clock)),
        ),
        StorageBackend::File => {
            let files = FileCache::new(&cache.dir);
            (
                Arc::new(FileTokenStore::new(files.clone(), signer, clock.clone())),
                Arc::new(FileSessionStore::new(files, clock)),
            )
        }
        StorageBackend::Database => {
            let pool = require(pool)?;
            (
                Arc::new(SqlTokenStore::new(pool.clone(), signer, clock.clone())),
                Arc::new(SqlSessionStore::new(pool, clock)),
            )
        }
        StorageBackend::Legacy => {
            let legacy = LegacyCache::new(require(pool)?, cache.prefix.clone());
            (
                Arc::new(LegacyTokenStore::new(legacy.clone(), signer, clock.clone())),
                Arc::new(LegacySessionStore::new(legacy, clock)),
            )
        }
    })
}

/// Build the profile lookup and option store.
pub async fn profile_backend(
    backend: ProfileBackend,
    pool: &Option<PgPool>,
    verifier: CredentialVerifier,
    uuid_mode: UuidMode,
    demo_users: &[DemoUser],
) -> Result<(Arc<dyn ProfileLookup>, Arc<dyn OptionStore>), BoxError> {
    info!(backend = ?backend, uuid_mode = ?uuid_mode, "profile storage");
    Ok(match backend {
        ProfileBackend::Memory => {
            let deriver = deriver(uuid_mode, Arc::new(MemoryUuidStore::new()));
            let profiles = MemoryProfiles::new(verifier, deriver);
            for demo in demo_users {
                let user = profiles.add_user(&demo.email, &demo.password).await?;
                profiles.add_profile(&user.id, &demo.profile).await?;
                info!(email = %demo.email, profile = %demo.profile, "seeded demo user");
            }
            (Arc::new(profiles), Arc::new(MemoryOptions::new()))
        }
        ProfileBackend::Database => {
            let pool = require(pool)?;
            let deriver = deriver(uuid_mode, Arc::new(SqlUuidStore::new(pool.clone())));
            (
                Arc::new(SqlProfiles::new(pool.clone(), verifier, deriver)),
                Arc::new(SqlOptions::new(pool)),
            )
        }
        ProfileBackend::Legacy => {
            let pool = require(pool)?;
            let deriver = deriver(uuid_mode, Arc::new(LegacyUuidStore::new(pool.clone())));
            (
                Arc::new(LegacyProfiles::new(pool.clone(), verifier, deriver)),
                Arc::new(LegacyOptions::new(pool)),
            )
        }
    })
}

fn deriver(mode: UuidMode, store: Arc<dyn UuidStore>) -> Arc<IdentityDeriver> {
    Arc::new(IdentityDeriver::new(mode, store))
}
