//! The `textures` profile property.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{SigningError, SigningService};
use crate::models::profile::{
    Profile, ProfileProperty, SignedProfile, TEXTURES_PROPERTY, UPLOADABLE_TEXTURES_PROPERTY,
};

/// Value of the `uploadableTextures` property.
const UPLOADABLE_TEXTURES: &str = "skin,cape";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TexturesPayload<'a> {
    timestamp: i64,
    profile_id: String,
    profile_name: &'a str,
    is_public: bool,
    textures: Textures<'a>,
}

#[derive(Serialize)]
struct Textures<'a> {
    #[serde(rename = "SKIN", skip_serializing_if = "Option::is_none")]
    skin: Option<Texture<'a>>,
    #[serde(rename = "CAPE", skip_serializing_if = "Option::is_none")]
    cape: Option<Texture<'a>>,
}

#[derive(Serialize)]
struct Texture<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<TextureMetadata>,
}

#[derive(Serialize)]
struct TextureMetadata {
    model: &'static str,
}

/// Base64-encoded textures JSON for a profile. `timestamp_ms` is the
/// generation time in unix milliseconds.
pub fn build_textures_payload(
    profile_id: Uuid,
    profile_name: &str,
    skin_url: Option<&str>,
    cape_url: Option<&str>,
    is_slim: bool,
    timestamp_ms: i64,
) -> String {
    let payload = TexturesPayload {
        timestamp: timestamp_ms,
        profile_id: profile_id.simple().to_string(),
        profile_name,
        is_public: true,
        textures: Textures {
            skin: skin_url.map(|url| Texture {
                url,
                metadata: is_slim.then_some(TextureMetadata { model: "slim" }),
            }),
            cape: cape_url.map(|url| Texture {
                url,
                metadata: None,
            }),
        },
    };
    // Serializing plain structs of strings and integers cannot fail.
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    STANDARD.encode(json)
}

/// Render a profile with its `textures` and `uploadableTextures` properties,
/// signing both when `signed` is set.
pub async fn render_profile(
    signing: &SigningService,
    profile: &Profile,
    site_url: &str,
    signed: bool,
    now: DateTime<Utc>,
) -> Result<SignedProfile, SigningError> {
    let skin_url = profile.skin.as_ref().map(|t| t.url(site_url));
    let cape_url = profile.cape.as_ref().map(|t| t.url(site_url));
    let textures = build_textures_payload(
        profile.id,
        &profile.name,
        skin_url.as_deref(),
        cape_url.as_deref(),
        profile.skin.as_ref().is_some_and(|t| t.slim),
        now.timestamp_millis(),
    );

    let mut properties = vec![
        ProfileProperty {
            name: TEXTURES_PROPERTY.to_string(),
            value: textures,
            signature: None,
        },
        ProfileProperty {
            name: UPLOADABLE_TEXTURES_PROPERTY.to_string(),
            value: UPLOADABLE_TEXTURES.to_string(),
            signature: None,
        },
    ];
    if signed {
        for property in &mut properties {
            property.signature = Some(signing.sign(&property.value).await?);
        }
    }

    Ok(SignedProfile {
        id: profile.unsigned_id(),
        name: profile.name.clone(),
        properties,
    })
}
