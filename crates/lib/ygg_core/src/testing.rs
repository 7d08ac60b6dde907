//! A fully wired in-memory deployment for engine tests.

use std::sync::Arc;

use crate::auth::engine::AuthEngine;
use crate::auth::password::{CredentialVerifier, PasswordAlgorithm};
use crate::clock::ManualClock;
use crate::identity::store::MemoryUuidStore;
use crate::identity::{IdentityDeriver, UuidMode};
use crate::models::profile::Profile;
use crate::profiles::ProfileLookup;
use crate::profiles::memory::MemoryProfiles;
use crate::session::{SessionEngine, SessionSettings};
use crate::signing::testing::PKCS8_PEM;
use crate::signing::{KeySource, SigningService};
use crate::store::memory::{MemorySessionStore, MemoryTokenStore};
use crate::store::testing as store_testing;

pub const SITE_URL: &str = "https://skins.example";

/// Users: `steve@example.com` owning "Steve", and `multi@example.com`
/// owning "Alpha" and "Bravo". Every password is "secret".
pub struct World {
    pub clock: ManualClock,
    pub profiles: Arc<MemoryProfiles>,
    pub tokens: Arc<MemoryTokenStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub auth: AuthEngine,
    pub session: SessionEngine,
}

impl World {
    pub async fn new() -> Self {
        Self::with_max_tokens(10).await
    }

    pub async fn with_max_tokens(max_tokens: usize) -> Self {
        let clock = store_testing::clock();
        let signer = store_testing::signer();
        let deriver = Arc::new(IdentityDeriver::new(
            UuidMode::Offline,
            Arc::new(MemoryUuidStore::new()),
        ));
        let profiles = Arc::new(MemoryProfiles::new(
            CredentialVerifier::new(PasswordAlgorithm::Sha256, ""),
            deriver,
        ));
        let steve = profiles.add_user("steve@example.com", "secret").await.unwrap();
        profiles.add_profile(&steve.id, "Steve").await.unwrap();
        let multi = profiles.add_user("multi@example.com", "secret").await.unwrap();
        profiles.add_profile(&multi.id, "Alpha").await.unwrap();
        profiles.add_profile(&multi.id, "Bravo").await.unwrap();

        let tokens = Arc::new(MemoryTokenStore::new(signer.clone(), Arc::new(clock.clone())));
        let sessions = Arc::new(MemorySessionStore::new(Arc::new(clock.clone())));
        let signing = Arc::new(SigningService::new(KeySource::Pem(PKCS8_PEM.into())));

        let auth = AuthEngine::new(
            profiles.clone(),
            tokens.clone(),
            signer,
            Arc::new(clock.clone()),
        )
        .with_max_tokens_per_user(max_tokens);
        let session = SessionEngine::new(
            tokens.clone(),
            sessions.clone(),
            profiles.clone(),
            signing,
            Arc::new(clock.clone()),
            SessionSettings {
                site_url: SITE_URL.into(),
                bulk_limit: 3,
            },
        );

        Self {
            clock,
            profiles,
            tokens,
            sessions,
            auth,
            session,
        }
    }

    pub async fn steve_profile(&self) -> Profile {
        self.profiles.profile_by_name("Steve").await.unwrap().unwrap()
    }
}
