//! Domain models shared by the engines and the storage backends.

pub mod auth;
pub mod profile;
