//! Outbound header preparation
//!
//! Inbound headers are copied to the downstream request minus anything
//! transport-specific, then the gateway-owned identity headers are set.
//! Downstream services trust `x-user-*` without verifying anything, so any
//! client-supplied copy is dropped before enrichment.

use crate::error::GatewayError;
use crate::middleware::jwt::Identity;
use actix_web::http::header::HeaderMap as InboundHeaders;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_EMAIL: &str = "x-user-email";
pub const X_USER_ROLES: &str = "x-user-roles";

const IDENTITY_HEADERS: [&str; 3] = [X_USER_ID, X_USER_EMAIL, X_USER_ROLES];

/// Headers meaningful only for a single transport-level connection
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers never copied from the client to a downstream request
fn is_stripped_request_header(name: &str) -> bool {
    is_hop_by_hop_header(name)
        || matches!(name, "host" | "content-length")
        || IDENTITY_HEADERS.contains(&name)
}

/// Header names listed in `Connection` are hop-by-hop for this message too.
fn connection_listed(headers: &InboundHeaders) -> Vec<String> {
    headers
        .get_all("connection")
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Copy forwardable inbound headers into a downstream header map.
pub fn forwardable_headers(inbound: &InboundHeaders) -> HeaderMap {
    let listed = connection_listed(inbound);
    let mut out = HeaderMap::with_capacity(inbound.len());

    for (name, value) in inbound.iter() {
        let name = name.as_str();
        if is_stripped_request_header(name) || listed.iter().any(|l| l == name) {
            continue;
        }
        // actix and reqwest use different `http` versions; convert via bytes
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }

    out
}

/// Set the identity headers for `identity`, or remove them for anonymous calls.
pub fn enrich_identity(headers: &mut HeaderMap, identity: Option<&Identity>) -> Result<(), GatewayError> {
    for name in IDENTITY_HEADERS {
        headers.remove(name);
    }

    let Some(identity) = identity else {
        return Ok(());
    };

    let encode = |value: &str| {
        HeaderValue::from_str(value).map_err(|_| {
            GatewayError::BadRequest("identity claims are not valid header values".to_string())
        })
    };

    headers.insert(X_USER_ID, encode(&identity.user_id)?);
    if let Some(email) = &identity.email {
        headers.insert(X_USER_EMAIL, encode(email)?);
    }
    let roles: Vec<&str> = identity.roles.iter().map(String::as_str).collect();
    headers.insert(X_USER_ROLES, encode(&roles.join(","))?);

    Ok(())
}

/// Append `x-forwarded-*` information for the downstream service.
pub fn add_forwarding(
    headers: &mut HeaderMap,
    client_ip: Option<&str>,
    scheme: &str,
    host: &str,
) {
    if let Some(ip) = client_ip {
        let chain = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
            _ => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert("x-forwarded-for", value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(scheme) {
        headers.insert("x-forwarded-proto", value);
    }
    if let Ok(value) = HeaderValue::from_str(host) {
        headers.insert("x-forwarded-host", value);
    }
}
