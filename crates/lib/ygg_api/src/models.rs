//! Wire models for the Yggdrasil endpoints.
//!
//! Field names follow the protocol's camelCase. Profile bodies reuse the
//! serializable types from `ygg_core::models::profile`.

use serde::{Deserialize, Serialize};
use ygg_core::auth::engine::{Authenticated, Refreshed};
use ygg_core::models::auth::User;
use ygg_core::models::profile::ProfileSummary;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Launcher identification sent with `authenticate`. Accepted and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Agent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub request_user: bool,
    #[serde(default)]
    pub agent: Option<Agent>,
}

/// Profile chosen on refresh; only `id` is consulted.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileSelection {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub access_token: String,
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub request_user: bool,
    #[serde(default)]
    pub selected_profile: Option<ProfileSelection>,
}

/// Body of both `validate` and `invalidate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub access_token: String,
    #[serde(default)]
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignoutRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub access_token: String,
    /// Unsigned or hyphenated UUID of the joining profile.
    pub selected_profile: String,
    pub server_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HasJoinedQuery {
    pub username: String,
    pub server_id: String,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileQuery {
    #[serde(default, deserialize_with = "query_flag")]
    pub unsigned: Option<bool>,
}

/// A boolean query flag. A bare key (`?unsigned`) counts as set.
fn query_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None => Ok(None),
        Some("" | "true" | "1") => Ok(Some(true)),
        Some("false" | "0") => Ok(Some(false)),
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid boolean flag {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// `user` object returned when `requestUser` is set.
#[derive(Debug, Clone, Serialize)]
pub struct UserDto {
    pub id: String,
    pub properties: Vec<serde_json::Value>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            properties: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    pub access_token: String,
    pub client_token: String,
    pub available_profiles: Vec<ProfileSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_profile: Option<ProfileSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserDto>,
}

impl AuthenticateResponse {
    pub fn new(auth: &Authenticated, request_user: bool) -> Self {
        Self {
            access_token: auth.token.access_token.clone(),
            client_token: auth.token.client_token.clone(),
            available_profiles: auth.available_profiles.iter().map(|p| p.summary()).collect(),
            selected_profile: auth.selected_profile.as_ref().map(|p| p.summary()),
            user: request_user.then(|| UserDto::from(&auth.user)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub client_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_profile: Option<ProfileSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserDto>,
}

impl RefreshResponse {
    pub fn new(refreshed: &Refreshed, request_user: bool) -> Self {
        Self {
            access_token: refreshed.token.access_token.clone(),
            client_token: refreshed.token.client_token.clone(),
            selected_profile: refreshed.selected_profile.as_ref().map(|p| p.summary()),
            user: request_user.then(|| UserDto::from(&refreshed.user)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetaLinks {
    pub homepage: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub server_name: String,
    pub implementation_name: String,
    pub implementation_version: String,
    pub links: MetaLinks,
}

/// Metadata document served at `GET /`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResponse {
    pub meta: Meta,
    pub skin_domains: Vec<String>,
    /// Note the protocol's lowercase `k`.
    #[serde(rename = "signaturePublickey")]
    pub signature_public_key: String,
}
