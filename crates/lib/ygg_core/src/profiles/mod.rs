//! User and profile lookup.
//!
//! [`ProfileLookup`] is read-mostly: it resolves users and profiles and
//! checks credentials. Backends compute profile UUIDs through the
//! [`IdentityDeriver`](crate::identity::IdentityDeriver) where their tables
//! do not store one.

pub mod legacy;
pub mod memory;
pub mod sql;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::auth::password::CredentialVerifier;
use crate::models::auth::User;
use crate::models::profile::Profile;
use crate::store::StoreError;

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Owner of the profile with this UUID.
    async fn user_by_profile_uuid(&self, uuid: Uuid) -> Result<Option<User>, StoreError>;

    /// Owner of the profile with this name.
    async fn user_by_player_name(&self, name: &str) -> Result<Option<User>, StoreError>;

    async fn profile_by_uuid(&self, uuid: Uuid) -> Result<Option<Profile>, StoreError>;

    /// Profile by name, case-insensitively.
    async fn profile_by_name(&self, name: &str) -> Result<Option<Profile>, StoreError>;

    /// Profiles for every name that has one; unknown names are skipped.
    async fn profiles_by_names(&self, names: &[String]) -> Result<Vec<Profile>, StoreError>;

    async fn profiles_of_user(&self, user_id: &str) -> Result<Vec<Profile>, StoreError>;

    fn verifier(&self) -> &CredentialVerifier;

    /// Resolve `username` (an email, else a player name) and check
    /// `password`. Unknown users and wrong passwords both yield `None`, and
    /// take comparable time. Hashing runs on the blocking pool.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, StoreError> {
        let user = match self.user_by_email(username).await? {
            Some(user) => Some(user),
            None => self.user_by_player_name(username).await?,
        };
        let verifier = self.verifier().clone();
        let password = password.to_string();
        let Some(user) = user else {
            tokio::task::spawn_blocking(move || verifier.burn(&password)).await?;
            debug!("authentication failed: unknown user");
            return Ok(None);
        };
        let stored = user.password_hash.clone();
        let matched = tokio::task::spawn_blocking(move || verifier.verify(&password, &stored)).await?;
        if matched {
            Ok(Some(user))
        } else {
            debug!(user_id = %user.id, "authentication failed: bad password");
            Ok(None)
        }
    }
}
