//! Player profile models.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Property name carrying the signed textures payload.
pub const TEXTURES_PROPERTY: &str = "textures";

/// Property name advertising which texture kinds may be uploaded.
pub const UPLOADABLE_TEXTURES_PROPERTY: &str = "uploadableTextures";

/// Metadata of a stored texture blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    /// Content hash; also the blob's file name in the texture store.
    pub hash: String,
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
    /// Skin uses the slim ("Alex") arm model.
    pub slim: bool,
}

impl TextureInfo {
    /// Public URL of the texture under the given site root.
    pub fn url(&self, site_url: &str) -> String {
        format!("{}/textures/{}", site_url.trim_end_matches('/'), self.hash)
    }
}

/// A player identity ("character") owned by a [`User`](super::auth::User).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub owner_id: String,
    pub skin: Option<TextureInfo>,
    pub cape: Option<TextureInfo>,
}

impl Profile {
    /// Unsigned (hyphen-less) UUID, as used on the wire.
    pub fn unsigned_id(&self) -> String {
        self.id.simple().to_string()
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: self.unsigned_id(),
            name: self.name.clone(),
        }
    }
}

/// `{id, name}` pair used in token responses and bulk lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
}

/// A profile property. `signature` is omitted entirely when unsigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A profile with its properties populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedProfile {
    pub id: String,
    pub name: String,
    pub properties: Vec<ProfileProperty>,
}
