//! The join / hasJoined handshake and profile queries.
//!
//! A client `join`s with its access token before connecting; the server then
//! asks `has_joined` with the player's name. A session answers exactly one
//! successful `has_joined` and lives for [`SESSION_TTL_SECS`]. Every failed
//! check reads as "not joined" with no hint of which check failed.
//!
//! [`SESSION_TTL_SECS`]: crate::store::SESSION_TTL_SECS

use std::collections::HashSet;
use std::sync::Arc;

use chrono::SubsecRound;
use tracing::debug;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::clock::SharedClock;
use crate::models::auth::Session;
use crate::models::profile::{ProfileSummary, SignedProfile};
use crate::profiles::ProfileLookup;
use crate::signing::SigningService;
use crate::signing::textures::render_profile;
use crate::store::{SessionStore, TokenStore};

/// Default cap on names per bulk profile query.
pub const DEFAULT_BULK_LIMIT: usize = 10;

/// Deployment settings the session engine needs.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Public site root; texture URLs hang off it.
    pub site_url: String,
    /// Maximum names per bulk profile query.
    pub bulk_limit: usize,
}

pub struct SessionEngine {
    tokens: Arc<dyn TokenStore>,
    sessions: Arc<dyn SessionStore>,
    profiles: Arc<dyn ProfileLookup>,
    signing: Arc<SigningService>,
    clock: SharedClock,
    settings: SessionSettings,
}

impl SessionEngine {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        sessions: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileLookup>,
        signing: Arc<SigningService>,
        clock: SharedClock,
        settings: SessionSettings,
    ) -> Self {
        Self {
            tokens,
            sessions,
            profiles,
            signing,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Record that the holder of `access_token` is joining `server_id` as
    /// `selected_profile`.
    pub async fn join(
        &self,
        access_token: &str,
        selected_profile: Uuid,
        server_id: &str,
        client_ip: Option<String>,
    ) -> Result<(), AuthError> {
        let token = self
            .tokens
            .get(access_token)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if token.profile_id != Some(selected_profile) {
            debug!(user_id = %token.owner_id, server_id, "join with a profile the token is not bound to");
            return Err(AuthError::InvalidToken);
        }

        let session = Session {
            server_id: server_id.to_string(),
            access_token: access_token.to_string(),
            profile_id: selected_profile,
            client_ip,
            created_at: self.clock.now().trunc_subsecs(0),
        };
        self.sessions.store(server_id, &session).await?;
        debug!(server_id, profile = %selected_profile, "join recorded");
        Ok(())
    }

    /// Consume the session for `server_id` if it belongs to `username` (and
    /// to `ip`, when given), returning the signed profile.
    pub async fn has_joined(
        &self,
        username: &str,
        server_id: &str,
        ip: Option<&str>,
    ) -> Result<Option<SignedProfile>, AuthError> {
        let Some(session) = self.sessions.get(server_id).await? else {
            return Ok(None);
        };
        let Some(profile) = self.profiles.profile_by_name(username).await? else {
            return Ok(None);
        };
        if !session_matches(&session, profile.id, ip) {
            debug!(server_id, "hasJoined for a different profile or address");
            return Ok(None);
        }

        // Only the caller that removes the session may answer for it.
        match self.sessions.take(server_id).await? {
            Some(taken) if session_matches(&taken, profile.id, ip) => {}
            Some(_) => {
                debug!(server_id, "session replaced during hasJoined");
                return Ok(None);
            }
            None => {
                debug!(server_id, "session already consumed");
                return Ok(None);
            }
        }
        let rendered =
            render_profile(&self.signing, &profile, &self.settings.site_url, true, self.clock.now()).await?;
        Ok(Some(rendered))
    }

    /// A profile by UUID, signed unless `unsigned`.
    pub async fn profile(&self, id: Uuid, unsigned: bool) -> Result<Option<SignedProfile>, AuthError> {
        let Some(profile) = self.profiles.profile_by_uuid(id).await? else {
            return Ok(None);
        };
        let rendered = render_profile(
            &self.signing,
            &profile,
            &self.settings.site_url,
            !unsigned,
            self.clock.now(),
        )
        .await?;
        Ok(Some(rendered))
    }

    /// `{id, name}` for each known name, at most [`SessionSettings::bulk_limit`]
    /// names per call.
    pub async fn profiles_by_names(&self, names: &[String]) -> Result<Vec<ProfileSummary>, AuthError> {
        if names.len() > self.settings.bulk_limit {
            return Err(AuthError::Forbidden(format!(
                "Too many names requested; the limit is {}.",
                self.settings.bulk_limit
            )));
        }
        let mut seen = HashSet::new();
        let wanted: Vec<String> = names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty() && seen.insert(n.to_lowercase()))
            .map(str::to_string)
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let profiles = self.profiles.profiles_by_names(&wanted).await?;
        Ok(profiles.iter().map(|p| p.summary()).collect())
    }
}

fn session_matches(session: &Session, profile_id: Uuid, ip: Option<&str>) -> bool {
    session.profile_id == profile_id
        && ip.is_none_or(|ip| session.client_ip.as_deref() == Some(ip))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Barrier;

    use super::*;
    use crate::clock::Clock;
    use crate::models::profile::{TEXTURES_PROPERTY, TextureInfo};
    use crate::signing::KeySource;
    use crate::signing::testing::PKCS8_PEM;
    use crate::store::memory::MemorySessionStore;
    use crate::store::{StoreError, session_ttl};
    use crate::testing::World;

    /// Session store whose reads wait until two callers have read.
    struct LockstepSessions {
        inner: MemorySessionStore,
        readers: Barrier,
    }

    #[async_trait]
    impl SessionStore for LockstepSessions {
        async fn store(&self, server_id: &str, session: &Session) -> Result<(), StoreError> {
            self.inner.store(server_id, session).await
        }

        async fn get(&self, server_id: &str) -> Result<Option<Session>, StoreError> {
            let session = self.inner.get(server_id).await;
            self.readers.wait().await;
            session
        }

        async fn delete(&self, server_id: &str) -> Result<(), StoreError> {
            self.inner.delete(server_id).await
        }

        async fn take(&self, server_id: &str) -> Result<Option<Session>, StoreError> {
            self.inner.take(server_id).await
        }

        async fn cleanup_expired(&self) -> Result<u64, StoreError> {
            self.inner.cleanup_expired().await
        }
    }

    async fn joined(world: &World, server_id: &str) {
        let auth = world.auth.authenticate("Steve", "secret", None).await.unwrap();
        let profile = auth.token.profile_id.unwrap();
        world
            .session
            .join(&auth.token.access_token, profile, server_id, Some("198.51.100.4".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn has_joined_returns_signed_profile_once() {
        let world = World::new().await;
        joined(&world, "abc").await;

        let profile = world
            .session
            .has_joined("Steve", "abc", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.name, "Steve");
        let textures = profile
            .properties
            .iter()
            .find(|p| p.name == TEXTURES_PROPERTY)
            .unwrap();
        assert!(!textures.signature.as_deref().unwrap_or_default().is_empty());

        assert!(world.session.has_joined("Steve", "abc", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_has_joined_answers_once() {
        let world = World::new().await;
        let sessions = Arc::new(LockstepSessions {
            inner: MemorySessionStore::new(Arc::new(world.clock.clone())),
            readers: Barrier::new(2),
        });
        let engine = SessionEngine::new(
            world.tokens.clone(),
            sessions.clone(),
            world.profiles.clone(),
            Arc::new(SigningService::new(KeySource::Pem(PKCS8_PEM.into()))),
            Arc::new(world.clock.clone()),
            world.session.settings().clone(),
        );
        let auth = world.auth.authenticate("Steve", "secret", None).await.unwrap();
        engine
            .join(&auth.token.access_token, auth.token.profile_id.unwrap(), "abc", None)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            engine.has_joined("Steve", "abc", None),
            engine.has_joined("Steve", "abc", None)
        );
        let answered = [a.unwrap(), b.unwrap()].iter().filter(|p| p.is_some()).count();
        assert_eq!(answered, 1);
        assert_eq!(sessions.inner.get("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn has_joined_after_ttl_is_not_joined() {
        let world = World::new().await;
        joined(&world, "abc").await;
        world.clock.advance(session_ttl());
        assert!(world.session.has_joined("Steve", "abc", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mismatches_read_as_not_joined_and_keep_the_session() {
        let world = World::new().await;
        joined(&world, "abc").await;

        assert!(world.session.has_joined("Alpha", "abc", None).await.unwrap().is_none());
        assert!(world.session.has_joined("Nobody", "abc", None).await.unwrap().is_none());
        assert!(
            world
                .session
                .has_joined("Steve", "abc", Some("203.0.113.99"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(world.session.has_joined("Steve", "other", None).await.unwrap().is_none());
        assert!(
            world
                .session
                .has_joined("Steve", "abc", Some("198.51.100.4"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn join_requires_the_bound_profile() {
        let world = World::new().await;
        let auth = world.auth.authenticate("Steve", "secret", None).await.unwrap();
        let err = world
            .session
            .join(&auth.token.access_token, Uuid::new_v4(), "abc", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));

        let err = world
            .session
            .join("bogus", auth.token.profile_id.unwrap(), "abc", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn a_second_join_replaces_the_first() {
        let world = World::new().await;
        joined(&world, "abc").await;
        let steve = world.steve_profile().await;
        let auth = world.auth.authenticate("Steve", "secret", None).await.unwrap();
        world
            .session
            .join(&auth.token.access_token, steve.id, "abc", Some("192.0.2.1".into()))
            .await
            .unwrap();
        assert!(
            world
                .session
                .has_joined("Steve", "abc", Some("192.0.2.1"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn profile_lookup_signs_on_request() {
        let world = World::new().await;
        let steve = world.steve_profile().await;
        world
            .profiles
            .set_textures(
                steve.id,
                Some(TextureInfo {
                    hash: "deadbeef".into(),
                    size: 1,
                    uploaded_at: world.clock.now(),
                    slim: false,
                }),
                None,
            )
            .await
            .unwrap();

        let unsigned = world.session.profile(steve.id, true).await.unwrap().unwrap();
        assert!(unsigned.properties.iter().all(|p| p.signature.is_none()));
        let signed = world.session.profile(steve.id, false).await.unwrap().unwrap();
        assert!(signed.properties.iter().all(|p| p.signature.is_some()));
        assert_eq!(signed.id, steve.unsigned_id());

        assert!(world.session.profile(Uuid::new_v4(), false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bulk_lookup_is_capped() {
        let world = World::new().await;
        let names = ["steve", "Alpha", "nobody"].map(String::from);
        let found = world.session.profiles_by_names(&names).await.unwrap();
        let found: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(found, vec!["Steve", "Alpha"]);

        let too_many = ["a", "b", "c", "d"].map(String::from);
        assert!(matches!(
            world.session.profiles_by_names(&too_many).await,
            Err(AuthError::Forbidden(_))
        ));
        assert!(world.session.profiles_by_names(&[]).await.unwrap().is_empty());
    }
}
