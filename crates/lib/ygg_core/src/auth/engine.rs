//! The token lifecycle: authenticate → refresh → validate → invalidate, plus
//! signout.
//!
//! Every credential or token failure surfaces as
//! [`AuthError::InvalidCredentials`] or [`AuthError::InvalidToken`] with no
//! further detail.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::AuthError;
use super::jwt::TokenSigner;
use crate::clock::SharedClock;
use crate::models::auth::{Token, User};
use crate::models::profile::Profile;
use crate::profiles::ProfileLookup;
use crate::store::TokenStore;

/// Default cap on live tokens per user.
pub const DEFAULT_MAX_TOKENS_PER_USER: usize = 10;

/// Result of a successful authenticate.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub token: Token,
    pub user: User,
    pub available_profiles: Vec<Profile>,
    pub selected_profile: Option<Profile>,
}

/// Result of a successful refresh.
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub token: Token,
    pub user: User,
    pub selected_profile: Option<Profile>,
}

pub struct AuthEngine {
    profiles: Arc<dyn ProfileLookup>,
    tokens: Arc<dyn TokenStore>,
    signer: Arc<TokenSigner>,
    clock: SharedClock,
    max_tokens_per_user: usize,
}

impl AuthEngine {
    pub fn new(
        profiles: Arc<dyn ProfileLookup>,
        tokens: Arc<dyn TokenStore>,
        signer: Arc<TokenSigner>,
        clock: SharedClock,
    ) -> Self {
        Self {
            profiles,
            tokens,
            signer,
            clock,
            max_tokens_per_user: DEFAULT_MAX_TOKENS_PER_USER,
        }
    }

    /// Cap live tokens per user; at least one is always allowed.
    pub fn with_max_tokens_per_user(mut self, max: usize) -> Self {
        self.max_tokens_per_user = max.max(1);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(0)
    }

    /// Mint and persist a token.
    async fn issue(
        &self,
        owner_id: &str,
        profile_id: Option<Uuid>,
        client_token: String,
    ) -> Result<Token, AuthError> {
        let now = self.now();
        let minted = self.signer.mint(owner_id, profile_id, now)?;
        let token = Token {
            access_token: minted.access_token,
            client_token,
            owner_id: owner_id.to_string(),
            token_id: minted.token_id,
            profile_id,
            created_at: now,
            expires_at: minted.expires_at,
        };
        self.tokens.store(&token).await?;
        Ok(token)
    }

    /// Delete the oldest tokens of `owner_id` so one more fits under the cap.
    async fn make_room(&self, owner_id: &str) -> Result<(), AuthError> {
        let mut existing = self.tokens.get_user_tokens(owner_id).await?;
        if existing.len() < self.max_tokens_per_user {
            return Ok(());
        }
        existing.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let excess = existing.len() + 1 - self.max_tokens_per_user;
        for token in existing.iter().take(excess) {
            self.tokens.delete(&token.access_token).await?;
        }
        debug!(user_id = owner_id, evicted = excess, "evicted oldest tokens");
        Ok(())
    }

    /// A live token matching `client_token` when one is given.
    async fn live_token(&self, access_token: &str, client_token: Option<&str>) -> Result<Token, AuthError> {
        let token = self
            .tokens
            .get(access_token)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if let Some(client_token) = client_token
            && client_token != token.client_token
        {
            debug!(user_id = %token.owner_id, "client token mismatch");
            return Err(AuthError::InvalidToken);
        }
        Ok(token)
    }

    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        client_token: Option<&str>,
    ) -> Result<Authenticated, AuthError> {
        let user = self
            .profiles
            .authenticate(username, password)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let available_profiles = self.profiles.profiles_of_user(&user.id).await?;
        let selected_profile = match available_profiles.as_slice() {
            [only] => Some(only.clone()),
            many => many.iter().find(|p| p.name == username).cloned(),
        };

        self.make_room(&user.id).await?;
        let client_token = client_token
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let token = self
            .issue(&user.id, selected_profile.as_ref().map(|p| p.id), client_token)
            .await?;
        info!(user_id = %user.id, profile = ?token.profile_id, "authenticated");

        Ok(Authenticated {
            token,
            user,
            available_profiles,
            selected_profile,
        })
    }

    pub async fn refresh(
        &self,
        access_token: &str,
        client_token: Option<&str>,
        selected_profile: Option<Uuid>,
    ) -> Result<Refreshed, AuthError> {
        let old = self.live_token(access_token, client_token).await?;
        let user = self
            .profiles
            .user_by_id(&old.owner_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let profile = match selected_profile {
            Some(requested) => {
                if old.profile_id.is_some() {
                    return Err(AuthError::IllegalArgument(
                        "Access token already has a profile assigned.".into(),
                    ));
                }
                let profile = self
                    .profiles
                    .profile_by_uuid(requested)
                    .await?
                    .filter(|p| p.owner_id == user.id)
                    .ok_or(AuthError::InvalidToken)?;
                Some(profile)
            }
            None => match old.profile_id {
                Some(id) => self.profiles.profile_by_uuid(id).await?,
                None => None,
            },
        };

        self.tokens.delete(&old.access_token).await?;
        let token = self
            .issue(&user.id, profile.as_ref().map(|p| p.id), old.client_token)
            .await?;
        debug!(user_id = %user.id, "refreshed token");

        Ok(Refreshed {
            token,
            user,
            selected_profile: profile,
        })
    }

    pub async fn validate(&self, access_token: &str, client_token: Option<&str>) -> Result<(), AuthError> {
        self.live_token(access_token, client_token).await.map(|_| ())
    }

    /// Revoke a token. Unknown tokens are not an error.
    pub async fn invalidate(&self, access_token: &str) -> Result<(), AuthError> {
        self.tokens.delete(access_token).await?;
        Ok(())
    }

    /// Revoke every token of the user after re-checking credentials.
    pub async fn signout(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let user = self
            .profiles
            .authenticate(username, password)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        self.tokens.delete_user_tokens(&user.id).await?;
        info!(user_id = %user.id, "signed out");
        Ok(())
    }
}
