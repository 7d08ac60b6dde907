//! Session server handshake.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::parse_profile_id;
use crate::AppState;
use crate::error::AppResult;
use crate::extract::{ClientIp, YggJson, YggQuery};
use crate::models::{HasJoinedQuery, JoinRequest};

/// `POST /sessionserver/session/minecraft/join`
pub async fn join_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    YggJson(body): YggJson<JoinRequest>,
) -> AppResult<StatusCode> {
    let profile = parse_profile_id(&body.selected_profile)?;
    state
        .sessions
        .join(&body.access_token, profile, &body.server_id, ip)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /sessionserver/session/minecraft/hasJoined`: 200 with the signed
/// profile, or 204 when the player has not joined.
pub async fn has_joined_handler(
    State(state): State<AppState>,
    YggQuery(query): YggQuery<HasJoinedQuery>,
) -> AppResult<Response> {
    let joined = state
        .sessions
        .has_joined(&query.username, &query.server_id, query.ip.as_deref())
        .await?;
    Ok(match joined {
        Some(profile) => Json(profile).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}
