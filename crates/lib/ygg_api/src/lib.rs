//! # ygg_api
//!
//! HTTP transport for Ygg: the Yggdrasil route table over the engines in
//! `ygg_core`.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::extract::FromRef;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use ygg_core::auth::engine::AuthEngine;
use ygg_core::session::SessionEngine;
use ygg_core::signing::SigningService;

use crate::config::ApiConfig;
use crate::extract::ProxyTrust;
use crate::handlers::{auth, meta, profiles, session};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthEngine>,
    pub sessions: Arc<SessionEngine>,
    /// Source of the public key in the metadata document.
    pub signing: Arc<SigningService>,
    pub config: ApiConfig,
}

impl FromRef<AppState> for ProxyTrust {
    fn from_ref(state: &AppState) -> Self {
        ProxyTrust(state.config.trust_proxy_headers)
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let authserver = Router::new()
        .route(routes::POST_AUTHENTICATE, post(auth::authenticate_handler))
        .route(routes::POST_REFRESH, post(auth::refresh_handler))
        .route(routes::POST_VALIDATE, post(auth::validate_handler))
        .route(routes::POST_INVALIDATE, post(auth::invalidate_handler))
        .route(routes::POST_SIGNOUT, post(auth::signout_handler));

    let sessionserver = Router::new()
        .route(routes::POST_JOIN, post(session::join_handler))
        .route(routes::GET_HAS_JOINED, get(session::has_joined_handler))
        .route(routes::GET_PROFILE, get(profiles::profile_handler))
        .route(
            routes::POST_BULK_PROFILES,
            post(profiles::bulk_profiles_handler),
        );

    Router::new()
        .route(routes::GET_METADATA, get(meta::metadata_handler))
        .merge(authserver)
        .merge(sessionserver)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
