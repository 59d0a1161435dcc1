//! Configuration for the API Gateway
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)
//!
//! Every key has a default suitable for local development. Values that are
//! present but unparsable are errors rather than silently replaced.

use crate::health::DEFAULT_PROBE_TIMEOUT;
use crate::middleware::jwt::MIN_SECRET_LEN;
use crate::middleware::rate_limit::{Quota, RateLimitConfig};
use crate::proxy::DEFAULT_REQUEST_TIMEOUT;
use crate::registry::{practicas_services, ServiceRegistryEntry};
use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEV_JWT_SECRET: &str = "practicas-dev-secret-change-me-in-production";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,

    /// Versioned prefix of the inbound API surface, e.g. `/api/v1`
    pub api_prefix: String,

    pub proxy: ProxyConfig,

    pub cors: CorsConfig,

    pub jwt: JwtConfig,

    /// Downstream services, in registry order
    pub services: Vec<ServiceRegistryEntry>,

    /// Services left out of health aggregation
    pub health_excluded: Vec<String>,

    pub rate_limit: RateLimitConfig,

    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub request_timeout: Duration,
    pub health_check_timeout: Duration,
    pub max_body_bytes: usize,
    /// Key anonymous clients by `X-Forwarded-For` instead of the TCP peer.
    /// Only safe behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Config {
    /// Load configuration from the process environment (and `.env`).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_prefix = normalize_prefix(&get("API_PREFIX").unwrap_or_else(|| "/api/v1".to_string()));

        let server = ServerConfig {
            host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "SERVER_PORT", 3000)?,
            workers: parse_or(&get, "SERVER_WORKERS", num_cpus::get())?,
        };

        let proxy = ProxyConfig {
            request_timeout: Duration::from_millis(parse_or(
                &get,
                "REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            )?),
            health_check_timeout: Duration::from_millis(parse_or(
                &get,
                "HEALTH_CHECK_TIMEOUT_MS",
                DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
            )?),
            max_body_bytes: parse_or(&get, "MAX_BODY_BYTES", 10 * 1024 * 1024)?,
            trust_forwarded_for: parse_or(&get, "TRUST_FORWARDED_FOR", false)?,
        };
        if proxy.request_timeout.is_zero() || proxy.health_check_timeout.is_zero() {
            bail!("REQUEST_TIMEOUT_MS and HEALTH_CHECK_TIMEOUT_MS must be greater than 0");
        }

        let cors = CorsConfig {
            allowed_origins: split_list(
                &get("CORS_ORIGINS")
                    .unwrap_or_else(|| "http://localhost:3000,http://localhost:4200".to_string()),
            ),
        };

        let jwt = JwtConfig {
            secret: get("JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.to_string()),
            issuer: get("JWT_ISSUER"),
            audience: get("JWT_AUDIENCE"),
        };
        if jwt.secret.len() < MIN_SECRET_LEN {
            bail!("JWT_SECRET must be at least {} bytes", MIN_SECRET_LEN);
        }

        let services = practicas_services(&api_prefix, |key| get(key));
        // Present but empty means "probe everything"
        let health_excluded = match lookup("HEALTH_EXCLUDED_SERVICES") {
            Some(raw) => split_list(&raw),
            None => vec!["messages".to_string()],
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            short: quota(&get, "SHORT", defaults.short)?,
            medium: quota(&get, "MEDIUM", defaults.medium)?,
            long: quota(&get, "LONG", defaults.long)?,
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            Some(other) => bail!("LOG_FORMAT must be 'json' or 'pretty', got '{}'", other),
        };

        Ok(Self {
            server,
            api_prefix,
            proxy,
            cors,
            jwt,
            services,
            health_excluded,
            rate_limit,
            log_format,
        })
    }
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {}", key, raw)),
        None => Ok(default),
    }
}

fn quota<F>(get: &F, class: &str, default: Quota) -> Result<Quota>
where
    F: Fn(&str) -> Option<String>,
{
    let limit_key = format!("RATE_LIMIT_{}_LIMIT", class);
    let window_key = format!("RATE_LIMIT_{}_WINDOW_MS", class);

    let limit: u32 = parse_or(get, &limit_key, default.limit)?;
    let window_ms: u64 = parse_or(get, &window_key, default.window.as_millis() as u64)?;

    if limit == 0 || window_ms == 0 {
        bail!("{} and {} must be greater than 0", limit_key, window_key);
    }

    Ok(Quota::new(limit, Duration::from_millis(window_ms)))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `api/v1/` → `/api/v1`; an empty prefix stays empty.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
