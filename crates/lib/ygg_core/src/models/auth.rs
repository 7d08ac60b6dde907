//! Authentication domain models.
//!
//! These are internal domain models, distinct from the wire models in
//! `ygg_api` (which carry `#[serde(rename)]` for camelCase etc.).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issuer written into every access token.
pub const TOKEN_ISSUER: &str = "Yggdrasil-Auth";

/// Domain user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Opaque identity id (numeric uid for the legacy backend).
    pub id: String,
    pub email: String,
    /// Stored credential hash; the scheme is chosen by configuration.
    pub password_hash: String,
}

/// Composite store key of a token: `(owner id, embedded token id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenKey {
    pub owner_id: String,
    pub token_id: String,
}

/// Server-side state of an issued access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub client_token: String,
    pub owner_id: String,
    /// Token id embedded in the access token's `yggt` claim.
    pub token_id: String,
    pub profile_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn key(&self) -> TokenKey {
        TokenKey {
            owner_id: self.owner_id.clone(),
            token_id: self.token_id.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: owner user id.
    pub sub: String,
    /// Token id, unique per issued token.
    pub yggt: String,
    /// Selected profile (unsigned UUID), if one is bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spr: Option<String>,
    pub iss: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

impl TokenClaims {
    pub fn key(&self) -> TokenKey {
        TokenKey {
            owner_id: self.sub.clone(),
            token_id: self.yggt.clone(),
        }
    }

    /// The bound profile, if the claim parses as a UUID.
    pub fn profile_id(&self) -> Option<Uuid> {
        self.spr.as_deref().and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// A pending server join, consumed by the first successful `hasJoined`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub server_id: String,
    pub access_token: String,
    pub profile_id: Uuid,
    pub client_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}
