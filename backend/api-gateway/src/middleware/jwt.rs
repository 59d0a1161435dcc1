//! Bearer token verification
//!
//! Verifies HS256 tokens against the configured secret and turns the claims
//! into an `Identity`. Every failure collapses into
//! `GatewayError::Unauthenticated`; invalid and expired tokens are
//! indistinguishable to the caller.

use crate::error::GatewayError;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Minimum HS256 secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Claims {
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub sub: Option<String>,
    /// Explicit user id claim, preferred over `sub` when present
    #[serde(
        default,
        rename = "userId",
        alias = "user_id",
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Single-role tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub exp: usize,
    #[serde(default)]
    pub iat: usize,
}

/// Auth services commonly issue numeric subjects; both forms become a string id.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    }))
}

/// Caller identity derived from a verified token. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub roles: BTreeSet<String>,
}

impl Identity {
    /// True when `allowed` is empty or shares at least one role.
    pub fn has_any_role(&self, allowed: &BTreeSet<String>) -> bool {
        allowed.is_empty() || !self.roles.is_disjoint(allowed)
    }

    /// Short form for logs: `email (user id)` or just the user id.
    pub fn summary(&self) -> String {
        match &self.email {
            Some(email) => format!("{} ({})", email, self.user_id),
            None => self.user_id.clone(),
        }
    }
}

impl TryFrom<Claims> for Identity {
    type Error = GatewayError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = claims
            .user_id
            .or(claims.sub)
            .filter(|id| !id.is_empty())
            .ok_or(GatewayError::Unauthenticated)?;

        let mut roles: BTreeSet<String> = claims.roles.into_iter().collect();
        roles.extend(claims.role);

        Ok(Self {
            user_id,
            email: claims.email.filter(|e| !e.is_empty()),
            roles,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("JWT secret too short: {0} bytes, at least {MIN_SECRET_LEN} required")]
    SecretTooShort(usize),
}

#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(
        secret: &str,
        issuer: Option<&str>,
        audience: Option<&str>,
    ) -> Result<Self, VerifierError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(VerifierError::SecretTooShort(secret.len()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // A configured issuer or audience must be present, not just match when present
        let mut required = vec!["exp"];
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }
        match audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&required);

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Verify a raw `Authorization` header value.
    pub fn verify(&self, authorization: Option<&str>) -> Result<Identity, GatewayError> {
        let header = authorization.ok_or(GatewayError::Unauthenticated)?;
        let token = bearer_token(header).ok_or(GatewayError::Unauthenticated)?;

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => debug!("rejected expired token"),
                kind => debug!(reason = ?kind, "rejected invalid token"),
            }
            GatewayError::Unauthenticated
        })?;

        Identity::try_from(data.claims)
    }
}

/// Extract the token from a `Bearer <token>` header; the scheme is case-insensitive.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
