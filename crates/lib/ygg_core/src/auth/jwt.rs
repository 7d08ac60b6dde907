//! Access token minting and verification.
//!
//! Access tokens are self-describing HS256 JWTs. The claims carry the owner
//! id, a random token id and the selected profile; together with the store
//! record keyed by `(owner, token id)` this gives stateless fast rejection
//! plus server-side revocation.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{debug, info};
use uuid::Uuid;

use super::AuthError;
use crate::models::auth::{TOKEN_ISSUER, TokenClaims};

/// Default access token lifetime: 3 days.
pub const DEFAULT_TOKEN_VALIDITY_DAYS: i64 = 3;

/// Length of the random token id embedded in each token.
const TOKEN_ID_LEN: usize = 24;

/// A freshly minted access token.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub access_token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies access tokens with a shared secret.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validity: Duration,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8], validity: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validity,
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Mint a token for `owner_id`, optionally bound to `profile`.
    pub fn mint(
        &self,
        owner_id: &str,
        profile: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<MintedToken, AuthError> {
        let token_id = generate_token_id();
        let expires_at = now + self.validity;
        let claims = TokenClaims {
            sub: owner_id.to_string(),
            yggt: token_id.clone(),
            spr: profile.map(|p| p.simple().to_string()),
            iss: TOKEN_ISSUER.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        Ok(MintedToken {
            access_token,
            token_id,
            expires_at,
        })
    }

    /// Verify signature, issuer and expiry (against `now`), returning the
    /// claims on success.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Option<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let claims = match decode::<TokenClaims>(token, &self.decoding, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!(error = %e, "rejected access token");
                return None;
            }
        };
        if claims.exp <= now.timestamp() {
            debug!(owner = %claims.sub, "access token past its expiry");
            return None;
        }
        Some(claims)
    }
}

/// Random alphanumeric token id.
fn generate_token_id() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_ID_LEN)
        .map(char::from)
        .collect()
}

/// Resolve the token signing secret: env var `YGG_TOKEN_SECRET` → persisted file.
/// Fails when the file can be neither read nor created.
pub fn resolve_token_secret() -> std::io::Result<String> {
    if let Ok(secret) = std::env::var("YGG_TOKEN_SECRET")
        && !secret.is_empty()
    {
        return Ok(secret);
    }
    load_or_create_secret(&token_secret_path())
}

/// Read the secret at `path`, generating and writing one if absent or blank.
fn load_or_create_secret(path: &Path) -> std::io::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(existing) if !existing.trim().is_empty() => return Ok(existing.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &secret)?;
    info!(path = %path.display(), "generated new token secret");
    Ok(secret)
}

/// Path to the persisted token secret file.
fn token_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ygg")
        .join("token-secret")
}
