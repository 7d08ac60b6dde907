//! # ygg_core
//!
//! Core protocol engine for Ygg, a Yggdrasil-compatible authentication and
//! session server.
//!
//! The transport layer (`ygg_api`) talks to two engines:
//!
//! - [`auth::engine::AuthEngine`]: authenticate / refresh / validate /
//!   invalidate / signout.
//! - [`session::SessionEngine`]: join / hasJoined and profile queries.
//!
//! Both are built on capability traits ([`store::TokenStore`],
//! [`store::SessionStore`], [`profiles::ProfileLookup`],
//! [`identity::store::UuidStore`], [`options::OptionStore`]) whose concrete
//! backends are chosen once at startup.

pub mod auth;
pub mod clock;
pub mod identity;
pub mod migrate;
pub mod models;
pub mod options;
pub mod php;
pub mod profiles;
pub mod session;
pub mod signing;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod testing;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
