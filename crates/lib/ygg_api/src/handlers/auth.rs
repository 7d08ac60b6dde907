//! Auth server handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use super::parse_profile_id;
use crate::AppState;
use crate::error::AppResult;
use crate::extract::YggJson;
use crate::models::{
    AuthenticateRequest, AuthenticateResponse, RefreshRequest, RefreshResponse, SignoutRequest,
    TokenRequest,
};

/// `POST /authserver/authenticate`: trade credentials for a token.
pub async fn authenticate_handler(
    State(state): State<AppState>,
    YggJson(body): YggJson<AuthenticateRequest>,
) -> AppResult<Json<AuthenticateResponse>> {
    let auth = state
        .auth
        .authenticate(&body.username, &body.password, body.client_token.as_deref())
        .await?;
    Ok(Json(AuthenticateResponse::new(&auth, body.request_user)))
}

/// `POST /authserver/refresh`: replace a token, optionally binding a profile.
pub async fn refresh_handler(
    State(state): State<AppState>,
    YggJson(body): YggJson<RefreshRequest>,
) -> AppResult<Json<RefreshResponse>> {
    let selected = body
        .selected_profile
        .as_ref()
        .map(|p| parse_profile_id(&p.id))
        .transpose()?;
    let refreshed = state
        .auth
        .refresh(&body.access_token, body.client_token.as_deref(), selected)
        .await?;
    Ok(Json(RefreshResponse::new(&refreshed, body.request_user)))
}

/// `POST /authserver/validate`
pub async fn validate_handler(
    State(state): State<AppState>,
    YggJson(body): YggJson<TokenRequest>,
) -> AppResult<StatusCode> {
    state
        .auth
        .validate(&body.access_token, body.client_token.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /authserver/invalidate`: succeeds for unknown tokens too.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    YggJson(body): YggJson<TokenRequest>,
) -> AppResult<StatusCode> {
    state.auth.invalidate(&body.access_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /authserver/signout`: revoke every token of the account.
pub async fn signout_handler(
    State(state): State<AppState>,
    YggJson(body): YggJson<SignoutRequest>,
) -> AppResult<StatusCode> {
    state.auth.signout(&body.username, &body.password).await?;
    Ok(StatusCode::NO_CONTENT)
}
