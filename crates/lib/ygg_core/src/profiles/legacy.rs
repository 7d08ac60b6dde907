//! Users and profiles in the legacy skin site's tables.
//!
//! `users` (uid, email, password), `players` (pid, uid, name, tid_skin,
//! tid_cape) and `textures` (tid, type, hash, size, upload_at). Players carry
//! no UUID; it comes from the identity deriver, which persists new mappings
//! in the site's `uuid` table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::ProfileLookup;
use crate::auth::password::CredentialVerifier;
use crate::identity::IdentityDeriver;
use crate::models::auth::User;
use crate::models::profile::{Profile, TextureInfo};
use crate::store::StoreError;

/// Texture type of a slim-model skin.
const SLIM_SKIN_TYPE: &str = "alex";

const PLAYER_SELECT: &str = "SELECT p.name, p.uid::TEXT, \
     s.hash, s.size::BIGINT, s.type, s.upload_at AT TIME ZONE 'UTC', \
     c.hash, c.size::BIGINT, c.upload_at AT TIME ZONE 'UTC' \
     FROM players p \
     LEFT JOIN textures s ON s.tid = p.tid_skin \
     LEFT JOIN textures c ON c.tid = p.tid_cape";

const USER_SELECT: &str = "SELECT u.uid::TEXT, u.email, u.password FROM users u";

type PlayerRow = (
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<i64>,
    Option<DateTime<Utc>>,
);

/// A player row before its UUID is resolved.
struct Player {
    name: String,
    owner_id: String,
    skin: Option<TextureInfo>,
    cape: Option<TextureInfo>,
}

impl Player {
    fn into_profile(self, id: Uuid) -> Profile {
        Profile {
            id,
            name: self.name,
            owner_id: self.owner_id,
            skin: self.skin,
            cape: self.cape,
        }
    }
}

fn player_from_row(row: PlayerRow) -> Player {
    let (name, owner_id, skin_hash, skin_size, skin_type, skin_at, cape_hash, cape_size, cape_at) = row;
    Player {
        name,
        owner_id,
        skin: skin_hash.map(|hash| TextureInfo {
            hash,
            size: skin_size.unwrap_or_default(),
            uploaded_at: skin_at.unwrap_or_default(),
            slim: skin_type.as_deref() == Some(SLIM_SKIN_TYPE),
        }),
        cape: cape_hash.map(|hash| TextureInfo {
            hash,
            size: cape_size.unwrap_or_default(),
            uploaded_at: cape_at.unwrap_or_default(),
            slim: false,
        }),
    }
}

fn user_from_row((id, email, password_hash): (String, String, String)) -> User {
    User {
        id,
        email,
        password_hash,
    }
}

#[derive(Clone)]
pub struct LegacyProfiles {
    pool: PgPool,
    verifier: CredentialVerifier,
    deriver: Arc<IdentityDeriver>,
}

impl LegacyProfiles {
    pub fn new(pool: PgPool, verifier: CredentialVerifier, deriver: Arc<IdentityDeriver>) -> Self {
        Self {
            pool,
            verifier,
            deriver,
        }
    }

    async fn player_by_name(&self, name: &str) -> Result<Option<Player>, StoreError> {
        let row = sqlx::query_as::<_, PlayerRow>(&format!(
            "{PLAYER_SELECT} WHERE lower(p.name) = lower($1) ORDER BY p.pid LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(player_from_row))
    }

    async fn resolve(&self, player: Player) -> Result<Profile, StoreError> {
        let id = self.deriver.get_or_create(&player.name).await?;
        Ok(player.into_profile(id))
    }

    async fn resolve_all(&self, players: Vec<Player>) -> Result<Vec<Profile>, StoreError> {
        let names: Vec<String> = players.iter().map(|p| p.name.clone()).collect();
        let ids = self.deriver.get_or_create_batch(&names).await?;
        players
            .into_iter()
            .map(|player| {
                let id = ids
                    .get(&player.name)
                    .copied()
                    .ok_or_else(|| StoreError::Corrupt(format!("no uuid for {}", player.name)))?;
                Ok(player.into_profile(id))
            })
            .collect()
    }
}

#[async_trait]
impl ProfileLookup for LegacyProfiles {
    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String)>(&format!(
            "{USER_SELECT} WHERE u.uid::TEXT = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String)>(&format!(
            "{USER_SELECT} WHERE lower(u.email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn user_by_profile_uuid(&self, uuid: Uuid) -> Result<Option<User>, StoreError> {
        match self.deriver.name_of(uuid).await? {
            Some(name) => self.user_by_player_name(&name).await,
            None => Ok(None),
        }
    }

    async fn user_by_player_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String)>(&format!(
            "{USER_SELECT} JOIN players p ON p.uid = u.uid \
             WHERE lower(p.name) = lower($1) ORDER BY p.pid LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn profile_by_uuid(&self, uuid: Uuid) -> Result<Option<Profile>, StoreError> {
        let Some(name) = self.deriver.name_of(uuid).await? else {
            return Ok(None);
        };
        let Some(player) = self.player_by_name(&name).await? else {
            return Ok(None);
        };
        // The mapping may belong to a renamed player whose new name maps
        // elsewhere.
        let profile = self.resolve(player).await?;
        Ok((profile.id == uuid).then_some(profile))
    }

    async fn profile_by_name(&self, name: &str) -> Result<Option<Profile>, StoreError> {
        match self.player_by_name(name).await? {
            Some(player) => Ok(Some(self.resolve(player).await?)),
            None => Ok(None),
        }
    }

    async fn profiles_by_names(&self, names: &[String]) -> Result<Vec<Profile>, StoreError> {
        let lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        let rows = sqlx::query_as::<_, PlayerRow>(&format!(
            "{PLAYER_SELECT} WHERE lower(p.name) = ANY($1) ORDER BY p.name"
        ))
        .bind(&lowered)
        .fetch_all(&self.pool)
        .await?;
        self.resolve_all(rows.into_iter().map(player_from_row).collect())
            .await
    }

    async fn profiles_of_user(&self, user_id: &str) -> Result<Vec<Profile>, StoreError> {
        let rows = sqlx::query_as::<_, PlayerRow>(&format!(
            "{PLAYER_SELECT} WHERE p.uid::TEXT = $1 ORDER BY p.name"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.resolve_all(rows.into_iter().map(player_from_row).collect())
            .await
    }

    fn verifier(&self) -> &CredentialVerifier {
        &self.verifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::{PasswordAlgorithm, hash_password};
    use crate::identity::store::LegacyUuidStore;
    use crate::identity::{UuidMode, offline_uuid};
    use crate::store::testing;

    /// Minimal copies of the site's tables, created if absent.
    async fn legacy_pool() -> Option<PgPool> {
        let pool = testing::pool().await?;
        for ddl in [
            "CREATE TABLE IF NOT EXISTS users (uid SERIAL PRIMARY KEY, email VARCHAR(100), \
             password VARCHAR(255))",
            "CREATE TABLE IF NOT EXISTS players (pid SERIAL PRIMARY KEY, uid INTEGER, \
             name VARCHAR(50), tid_skin INTEGER DEFAULT 0, tid_cape INTEGER DEFAULT 0)",
            "CREATE TABLE IF NOT EXISTS textures (tid SERIAL PRIMARY KEY, type VARCHAR(10), \
             hash VARCHAR(64), size INTEGER, upload_at TIMESTAMP DEFAULT now())",
            "CREATE TABLE IF NOT EXISTS \"uuid\" (id SERIAL PRIMARY KEY, name VARCHAR(255), \
             uuid VARCHAR(255))",
        ] {
            sqlx::query(ddl).execute(&pool).await.unwrap();
        }
        Some(pool)
    }

    #[tokio::test]
    async fn players_resolve_with_lazy_uuids_and_textures() {
        let Some(pool) = legacy_pool().await else {
            return;
        };
        let tag = Uuid::new_v4().simple().to_string();
        let name = format!("L{}", &tag[..10]);
        let stored = hash_password("secret", PasswordAlgorithm::Salted2Md5, "s").unwrap();
        let uid = sqlx::query_scalar::<_, i32>(
            "INSERT INTO users (email, password) VALUES ($1, $2) RETURNING uid",
        )
        .bind(format!("{tag}@example.com"))
        .bind(&stored)
        .fetch_one(&pool)
        .await
        .unwrap();
        let tid = sqlx::query_scalar::<_, i32>(
            "INSERT INTO textures (type, hash, size) VALUES ('alex', $1, 2) RETURNING tid",
        )
        .bind(&tag)
        .fetch_one(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO players (uid, name, tid_skin) VALUES ($1, $2, $3)")
            .bind(uid)
            .bind(&name)
            .bind(tid)
            .execute(&pool)
            .await
            .unwrap();

        let deriver = Arc::new(IdentityDeriver::new(
            UuidMode::Offline,
            Arc::new(LegacyUuidStore::new(pool.clone())),
        ));
        let lookup = LegacyProfiles::new(
            pool,
            CredentialVerifier::new(PasswordAlgorithm::Salted2Md5, "s"),
            deriver,
        );

        let profile = lookup.profile_by_name(&name).await.unwrap().unwrap();
        assert_eq!(profile.id, offline_uuid(&name));
        assert_eq!(profile.owner_id, uid.to_string());
        let skin = profile.skin.clone().unwrap();
        assert!(skin.slim);
        assert_eq!(skin.hash, tag);
        assert!(profile.cape.is_none());

        assert_eq!(
            lookup.profile_by_uuid(profile.id).await.unwrap().map(|p| p.name),
            Some(name.clone())
        );
        let user = lookup.authenticate(&name, "secret").await.unwrap().unwrap();
        assert_eq!(user.id, uid.to_string());
        assert_eq!(lookup.profiles_of_user(&user.id).await.unwrap().len(), 1);
    }
}
