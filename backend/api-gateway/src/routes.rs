//! Route table and classification
//!
//! Every inbound request is classified exactly once against an ordered list
//! of `RouteRule`s. The first matching rule decides whether the request is
//! public, which roles may call it, which rate class applies and which
//! logical service receives it.
//!
//! Pattern syntax (per path segment):
//! - literal text matches itself
//! - `*` matches exactly one segment
//! - a trailing `**` matches zero or more remaining segments

use crate::error::GatewayError;
use actix_web::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Named quota tier applied per route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateClass {
    /// Sensitive auth endpoints (login, register, refresh)
    Short,
    /// Password reset flows
    Medium,
    /// General proxied traffic
    Long,
}

impl RateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateClass::Short => "short",
            RateClass::Medium => "medium",
            RateClass::Long => "long",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
    Rest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Self {
        let segments = split_segments(raw)
            .map(|s| match s {
                "*" => Segment::Any,
                "**" => Segment::Rest,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();

        Self { segments }
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut parts = split_segments(path);

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                // Only meaningful in last position; anything after it is ignored
                Segment::Rest if i == self.segments.len() - 1 => return true,
                Segment::Rest => return false,
                Segment::Any => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(expected) => match parts.next() {
                    Some(part) if part == expected => {}
                    _ => return false,
                },
            }
        }

        parts.next().is_none()
    }

    /// Ordering key: more literal segments first, exact before open-ended.
    fn specificity(&self) -> (usize, bool) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        let open_ended = self.segments.iter().any(|s| *s == Segment::Rest);
        (literals, !open_ended)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct RouteRule {
    pub pattern: PathPattern,
    /// `None` matches every method
    pub methods: Option<Vec<Method>>,
    pub auth_required: bool,
    /// Empty = any authenticated role
    pub allowed_roles: BTreeSet<String>,
    pub rate_class: RateClass,
    pub target_service: String,
}

impl RouteRule {
    pub fn public(pattern: &str, target_service: &str) -> Self {
        Self {
            pattern: PathPattern::parse(pattern),
            methods: None,
            auth_required: false,
            allowed_roles: BTreeSet::new(),
            rate_class: RateClass::Long,
            target_service: target_service.to_string(),
        }
    }

    pub fn protected(pattern: &str, target_service: &str) -> Self {
        Self {
            auth_required: true,
            ..Self::public(pattern, target_service)
        }
    }

    pub fn methods(mut self, methods: &[Method]) -> Self {
        self.methods = Some(methods.to_vec());
        self
    }

    pub fn roles(mut self, roles: &[&str]) -> Self {
        self.allowed_roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn rate_class(mut self, class: RateClass) -> Self {
        self.rate_class = class;
        self
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        let method_ok = self
            .methods
            .as_ref()
            .map_or(true, |allowed| allowed.contains(method));
        method_ok && self.pattern.matches(path)
    }
}

/// Outcome of classifying one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub public: bool,
    pub allowed_roles: BTreeSet<String>,
    /// `None` when no rule matched
    pub target_service: Option<String>,
    pub normalized_path: String,
    pub rate_class: RateClass,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Rules are sorted most-specific-first; declaration order breaks ties.
    pub fn new(mut rules: Vec<RouteRule>) -> Self {
        rules.sort_by(|a, b| b.pattern.specificity().cmp(&a.pattern.specificity()));
        Self { rules }
    }

    /// Classify a gateway-relative, already normalized path.
    pub fn classify(&self, method: &Method, path: &str) -> RouteDecision {
        match self.rules.iter().find(|rule| rule.matches(method, path)) {
            Some(rule) => RouteDecision {
                public: !rule.auth_required,
                allowed_roles: rule.allowed_roles.clone(),
                target_service: Some(rule.target_service.clone()),
                normalized_path: path.to_string(),
                rate_class: rule.rate_class,
            },
            None => RouteDecision {
                public: false,
                allowed_roles: BTreeSet::new(),
                target_service: None,
                normalized_path: path.to_string(),
                rate_class: RateClass::Long,
            },
        }
    }

    /// Route table of the practicas platform.
    pub fn practicas() -> Self {
        const REPORTING_ROLES: &[&str] = &["admin", "supervisor"];
        const ADMIN: &[&str] = &["admin"];

        let mut rules = vec![
            // Auth flows: public and tightly limited
            RouteRule::public("/auth/login", "auth").rate_class(RateClass::Short),
            RouteRule::public("/auth/register", "auth").rate_class(RateClass::Short),
            RouteRule::public("/auth/refresh", "auth").rate_class(RateClass::Short),
            RouteRule::public("/auth/forgot-password", "auth").rate_class(RateClass::Medium),
            RouteRule::public("/auth/reset-password", "auth").rate_class(RateClass::Medium),
            // Public list endpoints under otherwise admin-only /users
            RouteRule::public("/users", "users").methods(&[Method::GET]),
            RouteRule::public("/users/professors", "users").methods(&[Method::GET]),
            RouteRule::public("/users/students", "users").methods(&[Method::GET]),
            RouteRule::protected("/auth/**", "auth"),
            RouteRule::protected("/users/**", "users").roles(ADMIN),
        ];

        for prefix in ["practices", "applications", "placements", "hour-logs"] {
            rules.push(RouteRule::protected(&format!("/{}/**", prefix), "practices"));
        }
        for prefix in ["assignments", "progress", "milestones"] {
            rules.push(RouteRule::protected(&format!("/{}/**", prefix), "progress"));
        }

        // messages and conversations live on different backends
        rules.push(RouteRule::protected("/messages/**", "messages"));
        rules.push(RouteRule::protected("/conversations/**", "communication"));

        rules.push(RouteRule::protected("/notifications/**", "notifications"));
        rules.push(RouteRule::protected("/templates/**", "notifications").roles(ADMIN));
        rules.push(RouteRule::protected("/documents/**", "documents"));

        for prefix in ["reports", "metrics", "dashboards", "analytics"] {
            rules.push(
                RouteRule::protected(&format!("/{}/**", prefix), "reporting")
                    .roles(REPORTING_ROLES),
            );
        }

        Self::new(rules)
    }
}

/// Strip the API prefix and normalize the remainder.
///
/// Collapses repeated slashes, drops trailing slashes and resolves `.` and
/// `..` segments so classification sees the same path the backend will.
/// Paths that climb above the root are rejected.
pub fn normalize_path(raw: &str, api_prefix: &str) -> Result<String, GatewayError> {
    let relative = match raw.strip_prefix(api_prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => raw,
    };

    let mut out: Vec<&str> = Vec::new();
    for segment in split_segments(relative) {
        match segment.to_ascii_lowercase().as_str() {
            "." | "%2e" => {}
            ".." | "%2e%2e" | ".%2e" | "%2e." => {
                if out.pop().is_none() {
                    return Err(GatewayError::BadRequest(format!(
                        "path escapes root: {}",
                        raw
                    )));
                }
            }
            _ => out.push(segment),
        }
    }

    Ok(format!("/{}", out.join("/")))
}
