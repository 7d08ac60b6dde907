//! In-memory users and profiles, seeded at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ProfileLookup;
use crate::auth::AuthError;
use crate::auth::password::CredentialVerifier;
use crate::identity::IdentityDeriver;
use crate::models::auth::User;
use crate::models::profile::{Profile, TextureInfo};
use crate::store::StoreError;

#[derive(Default)]
struct Directory {
    users: HashMap<String, User>,
    profiles: HashMap<Uuid, Profile>,
    next_user_id: u64,
}

impl Directory {
    fn profile_named(&self, name: &str) -> Option<&Profile> {
        self.profiles
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

pub struct MemoryProfiles {
    verifier: CredentialVerifier,
    deriver: Arc<IdentityDeriver>,
    directory: RwLock<Directory>,
}

impl MemoryProfiles {
    pub fn new(verifier: CredentialVerifier, deriver: Arc<IdentityDeriver>) -> Self {
        Self {
            verifier,
            deriver,
            directory: RwLock::new(Directory::default()),
        }
    }

    /// Register a user, hashing `password` with the configured scheme.
    pub async fn add_user(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let password_hash = self.verifier.hash(password)?;
        let mut dir = self.directory.write().await;
        if dir.users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(AuthError::IllegalArgument(format!("Email {email} is already registered.")));
        }
        dir.next_user_id += 1;
        let user = User {
            id: dir.next_user_id.to_string(),
            email: email.to_string(),
            password_hash,
        };
        dir.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    /// Create a profile named `name` for `owner_id`.
    pub async fn add_profile(&self, owner_id: &str, name: &str) -> Result<Profile, AuthError> {
        let id = self.deriver.get_or_create(name).await?;
        let mut dir = self.directory.write().await;
        if !dir.users.contains_key(owner_id) {
            return Err(AuthError::IllegalArgument(format!("No such user {owner_id}.")));
        }
        if dir.profile_named(name).is_some() || dir.profiles.contains_key(&id) {
            return Err(AuthError::IllegalArgument(format!("Profile name {name} is taken.")));
        }
        let profile = Profile {
            id,
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            skin: None,
            cape: None,
        };
        dir.profiles.insert(id, profile.clone());
        Ok(profile)
    }

    /// Replace a profile's textures.
    pub async fn set_textures(
        &self,
        profile_id: Uuid,
        skin: Option<TextureInfo>,
        cape: Option<TextureInfo>,
    ) -> Result<(), AuthError> {
        let mut dir = self.directory.write().await;
        let profile = dir
            .profiles
            .get_mut(&profile_id)
            .ok_or_else(|| AuthError::IllegalArgument(format!("No such profile {profile_id}.")))?;
        profile.skin = skin;
        profile.cape = cape;
        Ok(())
    }
}

#[async_trait]
impl ProfileLookup for MemoryProfiles {
    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.directory.read().await.users.get(id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .directory
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn user_by_profile_uuid(&self, uuid: Uuid) -> Result<Option<User>, StoreError> {
        let dir = self.directory.read().await;
        Ok(dir
            .profiles
            .get(&uuid)
            .and_then(|p| dir.users.get(&p.owner_id))
            .cloned())
    }

    async fn user_by_player_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let dir = self.directory.read().await;
        Ok(dir
            .profile_named(name)
            .and_then(|p| dir.users.get(&p.owner_id))
            .cloned())
    }

    async fn profile_by_uuid(&self, uuid: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(self.directory.read().await.profiles.get(&uuid).cloned())
    }

    async fn profile_by_name(&self, name: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.directory.read().await.profile_named(name).cloned())
    }

    async fn profiles_by_names(&self, names: &[String]) -> Result<Vec<Profile>, StoreError> {
        let dir = self.directory.read().await;
        let mut found: Vec<Profile> = Vec::new();
        for name in names {
            if let Some(profile) = dir.profile_named(name)
                && !found.iter().any(|p| p.id == profile.id)
            {
                found.push(profile.clone());
            }
        }
        Ok(found)
    }

    async fn profiles_of_user(&self, user_id: &str) -> Result<Vec<Profile>, StoreError> {
        let dir = self.directory.read().await;
        let mut profiles: Vec<Profile> = dir
            .profiles
            .values()
            .filter(|p| p.owner_id == user_id)
            .cloned()
            .collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    fn verifier(&self) -> &CredentialVerifier {
        &self.verifier
    }
}
