//! Users and profiles in the native `ygg_users` / `ygg_profiles` /
//! `ygg_textures` tables.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::ProfileLookup;
use crate::auth::AuthError;
use crate::auth::password::CredentialVerifier;
use crate::identity::IdentityDeriver;
use crate::models::auth::User;
use crate::models::profile::{Profile, TextureInfo};
use crate::store::StoreError;

const PROFILE_SELECT: &str = "SELECT p.id, p.name, p.owner_id, \
     s.hash, s.size, s.slim, s.uploaded_at, c.hash, c.size, c.uploaded_at \
     FROM ygg_profiles p \
     LEFT JOIN ygg_textures s ON s.hash = p.skin_hash \
     LEFT JOIN ygg_textures c ON c.hash = p.cape_hash";

type ProfileRow = (
    Uuid,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<bool>,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<i64>,
    Option<DateTime<Utc>>,
);

fn profile_from_row(row: ProfileRow) -> Profile {
    let (id, name, owner_id, skin_hash, skin_size, skin_slim, skin_at, cape_hash, cape_size, cape_at) = row;
    Profile {
        id,
        name,
        owner_id,
        skin: skin_hash.map(|hash| TextureInfo {
            hash,
            size: skin_size.unwrap_or_default(),
            uploaded_at: skin_at.unwrap_or_default(),
            slim: skin_slim.unwrap_or_default(),
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
pub struct SqlProfiles {
    pool: PgPool,
    verifier: CredentialVerifier,
    deriver: Arc<IdentityDeriver>,
}

impl SqlProfiles {
    pub fn new(pool: PgPool, verifier: CredentialVerifier, deriver: Arc<IdentityDeriver>) -> Self {
        Self {
            pool,
            verifier,
            deriver,
        }
    }

    /// Register a user, hashing `password` with the configured scheme.
    pub async fn create_user(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let password_hash = self.verifier.hash(password)?;
        let id = Uuid::new_v4().simple().to_string();
        let row = sqlx::query_as::<_, (String, String, String)>(
            "INSERT INTO ygg_users (id, email, password_hash) VALUES ($1, $2, $3) \
             ON CONFLICT (email) DO NOTHING RETURNING id, email, password_hash",
        )
        .bind(&id)
        .bind(email)
        .bind(&password_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;
        row.map(user_from_row)
            .ok_or_else(|| AuthError::IllegalArgument(format!("Email {email} is already registered.")))
    }

    /// Create a profile named `name` for `owner_id`, with its UUID from the
    /// identity deriver.
    pub async fn create_profile(&self, owner_id: &str, name: &str) -> Result<Profile, AuthError> {
        if self.profile_by_name(name).await?.is_some() {
            return Err(AuthError::IllegalArgument(format!("Profile name {name} is taken.")));
        }
        let id = self.deriver.get_or_create(name).await?;
        sqlx::query("INSERT INTO ygg_profiles (id, name, owner_id) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(name)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(Profile {
            id,
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            skin: None,
            cape: None,
        })
    }

    async fn one_user(&self, sql: &str, bind: impl ToString) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String)>(sql)
            .bind(bind.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(user_from_row))
    }
}

#[async_trait]
impl ProfileLookup for SqlProfiles {
    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.one_user("SELECT id, email, password_hash FROM ygg_users WHERE id = $1", id)
            .await
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.one_user(
            "SELECT id, email, password_hash FROM ygg_users WHERE lower(email) = lower($1)",
            email,
        )
        .await
    }

    async fn user_by_profile_uuid(&self, uuid: Uuid) -> Result<Option<User>, StoreError> {
        self.one_user(
            "SELECT u.id, u.email, u.password_hash FROM ygg_users u \
             JOIN ygg_profiles p ON p.owner_id = u.id WHERE p.id = $1::uuid",
            uuid,
        )
        .await
    }

    async fn user_by_player_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        self.one_user(
            "SELECT u.id, u.email, u.password_hash FROM ygg_users u \
             JOIN ygg_profiles p ON p.owner_id = u.id WHERE lower(p.name) = lower($1)",
            name,
        )
        .await
    }

    async fn profile_by_uuid(&self, uuid: Uuid) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!("{PROFILE_SELECT} WHERE p.id = $1"))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(profile_from_row))
    }

    async fn profile_by_name(&self, name: &str) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "{PROFILE_SELECT} WHERE lower(p.name) = lower($1)"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(profile_from_row))
    }

    async fn profiles_by_names(&self, names: &[String]) -> Result<Vec<Profile>, StoreError> {
        let lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "{PROFILE_SELECT} WHERE lower(p.name) = ANY($1) ORDER BY p.name"
        ))
        .bind(&lowered)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(profile_from_row).collect())
    }

    async fn profiles_of_user(&self, user_id: &str) -> Result<Vec<Profile>, StoreError> {
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "{PROFILE_SELECT} WHERE p.owner_id = $1 ORDER BY p.name"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(profile_from_row).collect())
    }

    fn verifier(&self) -> &CredentialVerifier {
        &self.verifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::PasswordAlgorithm;
    use crate::identity::store::SqlUuidStore;
    use crate::identity::{UuidMode, offline_uuid};
    use crate::store::testing;

    #[tokio::test]
    async fn created_profiles_resolve_every_way() {
        let Some(pool) = testing::pool().await else {
            return;
        };
        let deriver = Arc::new(IdentityDeriver::new(
            UuidMode::Offline,
            Arc::new(SqlUuidStore::new(pool.clone())),
        ));
        let lookup = SqlProfiles::new(
            pool,
            CredentialVerifier::new(PasswordAlgorithm::Sha256, ""),
            deriver,
        );
        let tag = Uuid::new_v4().simple().to_string();
        let name = format!("p{}", &tag[..12]);
        let user = lookup
            .create_user(&format!("{tag}@example.com"), "secret")
            .await
            .unwrap();
        let profile = lookup.create_profile(&user.id, &name).await.unwrap();
        assert_eq!(profile.id, offline_uuid(&name));
        assert!(lookup.create_profile(&user.id, &name.to_uppercase()).await.is_err());

        assert_eq!(lookup.user_by_profile_uuid(profile.id).await.unwrap(), Some(user.clone()));
        assert_eq!(
            lookup.profile_by_name(&name.to_uppercase()).await.unwrap().map(|p| p.id),
            Some(profile.id)
        );
        let batch = lookup
            .profiles_by_names(&[name.clone(), "nobody-here".into()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(
            lookup.authenticate(&name, "secret").await.unwrap().map(|u| u.id),
            Some(user.id)
        );
    }
}
