//! Request extractors.
//!
//! [`YggJson`] and [`YggQuery`] wrap axum's extractors so decode failures
//! render as the Yggdrasil error body instead of axum's plain-text rejection.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRef, FromRequest, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::error::AppError;

/// JSON body extractor rejecting with [`AppError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct YggJson<T>(pub T);

/// Query-string extractor rejecting with [`AppError`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct YggQuery<T>(pub T);

/// Whether proxy headers name the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyTrust(pub bool);

/// Address of the calling client, if one can be determined.
///
/// Behind a trusted proxy the first hop of `X-Forwarded-For` wins, then
/// `X-Real-IP`. Otherwise those headers are ignored and only the socket
/// peer from [`ConnectInfo`] counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl<S> FromRequestParts<S> for ClientIp
where
    ProxyTrust: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let ProxyTrust(trusted) = ProxyTrust::from_ref(state);
        if !trusted {
            return Ok(Self(peer));
        }
        Ok(Self(forwarded_ip(&parts.headers).or(peer)))
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(first) = header("x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(first.to_string());
    }
    header("x-real-ip").map(str::to_string)
}
