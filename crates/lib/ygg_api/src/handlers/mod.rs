//! Request handlers, one module per server role.

pub mod auth;
pub mod meta;
pub mod profiles;
pub mod session;

use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Parse a profile id in either unsigned or hyphenated form.
pub(crate) fn parse_profile_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::IllegalArgument("Invalid profile id.".into()))
}
