//! `GET /` metadata document.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::AppResult;
use crate::models::{Meta, MetaLinks, MetadataResponse};

/// Implementation name advertised to launchers.
pub const IMPLEMENTATION_NAME: &str = "ygg";

pub async fn metadata_handler(State(state): State<AppState>) -> AppResult<Json<MetadataResponse>> {
    let signature_public_key = state.signing.public_key_pem().await?;
    Ok(Json(MetadataResponse {
        meta: Meta {
            server_name: state.config.server_name.clone(),
            implementation_name: IMPLEMENTATION_NAME.to_string(),
            implementation_version: ygg_core::version().to_string(),
            links: MetaLinks {
                homepage: state.config.site_url.clone(),
            },
        },
        skin_domains: state.config.skin_domains(),
        signature_public_key,
    }))
}
