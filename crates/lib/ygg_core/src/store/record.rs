//! PHP-serialized representations of tokens and sessions, shared by the
//! file and legacy backends.
//!
//! Timestamps are stored as unix seconds.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::StoreError;
use crate::models::auth::{Session, Token};
use crate::php::PhpValue;

/// Cache key of a token record.
pub fn token_key(owner_id: &str, token_id: &str) -> String {
    format!("yggdrasil-token-{owner_id}-{token_id}")
}

/// Cache key of a user's token-id index.
pub fn user_index_key(owner_id: &str) -> String {
    format!("yggdrasil-user-{owner_id}")
}

/// Cache key of a join session.
pub fn session_key(server_id: &str) -> String {
    format!("yggdrasil-server-{server_id}")
}

fn timestamp(value: Option<&PhpValue>, field: &str) -> Result<DateTime<Utc>, StoreError> {
    value
        .and_then(PhpValue::as_int)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .ok_or_else(|| StoreError::Corrupt(format!("missing or invalid {field}")))
}

fn string(value: Option<&PhpValue>, field: &str) -> Result<String, StoreError> {
    value
        .and_then(PhpValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Corrupt(format!("missing or invalid {field}")))
}

fn uuid(value: Option<&PhpValue>, field: &str) -> Result<Option<Uuid>, StoreError> {
    match value {
        None | Some(PhpValue::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid {field}"))),
    }
}

pub fn token_to_php(token: &Token) -> PhpValue {
    PhpValue::assoc([
        ("accessToken", PhpValue::str(&token.access_token)),
        ("clientToken", PhpValue::str(&token.client_token)),
        ("owner", PhpValue::str(&token.owner_id)),
        ("tokenId", PhpValue::str(&token.token_id)),
        (
            "profileId",
            token
                .profile_id
                .map(|p| PhpValue::str(&p.simple().to_string()))
                .unwrap_or(PhpValue::Null),
        ),
        ("createdAt", PhpValue::Int(token.created_at.timestamp())),
        ("expiresAt", PhpValue::Int(token.expires_at.timestamp())),
    ])
}

pub fn token_from_php(value: &PhpValue) -> Result<Token, StoreError> {
    Ok(Token {
        access_token: string(value.get("accessToken"), "accessToken")?,
        client_token: string(value.get("clientToken"), "clientToken")?,
        owner_id: string(value.get("owner"), "owner")?,
        token_id: string(value.get("tokenId"), "tokenId")?,
        profile_id: uuid(value.get("profileId"), "profileId")?,
        created_at: timestamp(value.get("createdAt"), "createdAt")?,
        expires_at: timestamp(value.get("expiresAt"), "expiresAt")?,
    })
}

pub fn session_to_php(session: &Session) -> PhpValue {
    PhpValue::assoc([
        ("serverId", PhpValue::str(&session.server_id)),
        ("accessToken", PhpValue::str(&session.access_token)),
        ("profileId", PhpValue::str(&session.profile_id.simple().to_string())),
        (
            "ip",
            session
                .client_ip
                .as_deref()
                .map(PhpValue::str)
                .unwrap_or(PhpValue::Null),
        ),
        ("createdAt", PhpValue::Int(session.created_at.timestamp())),
    ])
}

pub fn session_from_php(value: &PhpValue) -> Result<Session, StoreError> {
    Ok(Session {
        server_id: string(value.get("serverId"), "serverId")?,
        access_token: string(value.get("accessToken"), "accessToken")?,
        profile_id: uuid(value.get("profileId"), "profileId")?
            .ok_or_else(|| StoreError::Corrupt("missing profileId".into()))?,
        client_ip: match value.get("ip") {
            None | Some(PhpValue::Null) => None,
            Some(v) => Some(
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| StoreError::Corrupt("invalid ip".into()))?,
            ),
        },
        created_at: timestamp(value.get("createdAt"), "createdAt")?,
    })
}

pub fn token_ids_to_php(ids: &[String]) -> PhpValue {
    PhpValue::list(ids.iter().map(|id| PhpValue::str(id)))
}

pub fn token_ids_from_php(value: &PhpValue) -> Vec<String> {
    value
        .values()
        .filter_map(PhpValue::as_str)
        .map(str::to_string)
        .collect()
}
