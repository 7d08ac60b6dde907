//! Route paths served by the router.

pub const GET_METADATA: &str = "/";

pub const POST_AUTHENTICATE: &str = "/authserver/authenticate";
pub const POST_REFRESH: &str = "/authserver/refresh";
pub const POST_VALIDATE: &str = "/authserver/validate";
pub const POST_INVALIDATE: &str = "/authserver/invalidate";
pub const POST_SIGNOUT: &str = "/authserver/signout";

pub const POST_JOIN: &str = "/sessionserver/session/minecraft/join";
pub const GET_HAS_JOINED: &str = "/sessionserver/session/minecraft/hasJoined";
pub const GET_PROFILE: &str = "/sessionserver/session/minecraft/profile/{uuid}";

pub const POST_BULK_PROFILES: &str = "/api/profiles/minecraft";
