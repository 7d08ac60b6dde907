//! Profile queries.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::debug;
use ygg_core::models::profile::ProfileSummary;

use super::parse_profile_id;
use crate::AppState;
use crate::error::AppResult;
use crate::extract::{YggJson, YggQuery};
use crate::models::ProfileQuery;

/// `GET /sessionserver/session/minecraft/profile/{uuid}`: signed only with
/// `?unsigned=false`. Unknown or malformed ids answer 204.
pub async fn profile_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    YggQuery(query): YggQuery<ProfileQuery>,
) -> AppResult<Response> {
    let Ok(id) = parse_profile_id(&raw_id) else {
        debug!(raw_id, "profile lookup with malformed id");
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let unsigned = query.unsigned.unwrap_or(true);
    Ok(match state.sessions.profile(id, unsigned).await? {
        Some(profile) => Json(profile).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// `POST /api/profiles/minecraft`: `{id, name}` for each known name.
pub async fn bulk_profiles_handler(
    State(state): State<AppState>,
    YggJson(names): YggJson<Vec<String>>,
) -> AppResult<Json<Vec<ProfileSummary>>> {
    Ok(Json(state.sessions.profiles_by_names(&names).await?))
}
