//! Builds a [`RequestContext`] from an incoming request.
//!
//! Flow Overview:
//! - Each session kind is read from the `Authorization: Bearer` header
//!   (authentication only), then a header named `{prefix}_{kind}`, then the
//!   cookie of the same name.
//! - The client address is the peer address, or the first `X-Forwarded-For`
//!   entry when the deployment trusts its proxy to set that header.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
        Extensions, HeaderMap,
    },
};
use std::{convert::Infallible, net::IpAddr, net::SocketAddr};

use crate::security::{RequestContext, Security, SecurityConfig, SessionKind};

/// Extractor wrapping the context of the current request.
#[derive(Clone, Debug)]
pub struct Client(pub RequestContext);

#[async_trait]
impl FromRequestParts<Security> for Client {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        security: &Security,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(request_context(
            &parts.headers,
            peer_ip(&parts.extensions),
            security.config(),
        )))
    }
}

/// Peer address recorded by `into_make_service_with_connect_info`.
#[must_use]
pub fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

#[must_use]
pub fn request_context(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    config: &SecurityConfig,
) -> RequestContext {
    let ip = if config.trust_forwarded_for() {
        forwarded_for(headers).or(peer)
    } else {
        peer
    };
    let cookie = config.cookie();
    let mut context = RequestContext::new().with_ip(ip);
    for kind in SessionKind::ALL {
        let name = cookie.name(kind);
        let token = if kind == SessionKind::Authentication {
            bearer_token(headers)
        } else {
            None
        }
        .or_else(|| header_value(headers, &name))
        .or_else(|| cookie_value(headers, &name));
        if let Some(token) = token {
            context = context.with_token(kind, token);
        }
    }
    context
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name && !val.trim().is_empty()).then(|| val.trim().to_string())
        })
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}
