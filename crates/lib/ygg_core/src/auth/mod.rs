//! Authentication: token minting, credential verification and the
//! authenticate / refresh / validate / invalidate / signout engine.

pub mod engine;
pub mod jwt;
pub mod password;

use thiserror::Error;

use crate::signing::SigningError;
use crate::store::StoreError;

/// Authentication errors.
///
/// Credential and token failures carry no detail: a wrong password and an
/// unknown user produce the same [`AuthError::InvalidCredentials`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials. Invalid username or password.")]
    InvalidCredentials,

    #[error("Invalid token.")]
    InvalidToken,

    #[error("{0}")]
    IllegalArgument(String),

    /// A refused request that is not a credential or token failure.
    #[error("{0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Internal error: {0}")]
    Internal(String),
}
