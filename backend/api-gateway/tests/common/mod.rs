//! Shared fixtures for gateway integration tests

#![allow(dead_code)]

use api_gateway::config::Config;
use api_gateway::middleware::Claims;
use api_gateway::Gateway;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::collections::HashMap;

pub const SECRET: &str = "practicas-integration-secret-0123456789";

const SERVICE_KEYS: &[&str] = &[
    "AUTH_SERVICE_URL",
    "USERS_SERVICE_URL",
    "PRACTICES_SERVICE_URL",
    "PROGRESS_SERVICE_URL",
    "MESSAGES_SERVICE_URL",
    "COMMUNICATION_SERVICE_URL",
    "NOTIFICATIONS_SERVICE_URL",
    "DOCUMENTS_SERVICE_URL",
    "REPORTING_SERVICE_URL",
];

/// Config with every downstream pointed at `base_url`; `overrides` win.
pub fn config(base_url: &str, overrides: &[(&str, &str)]) -> Config {
    let mut env: HashMap<String, String> = SERVICE_KEYS
        .iter()
        .map(|key| (key.to_string(), base_url.to_string()))
        .collect();
    env.insert("JWT_SECRET".to_string(), SECRET.to_string());
    for (key, value) in overrides {
        env.insert(key.to_string(), value.to_string());
    }

    Config::from_lookup(|key| env.get(key).cloned()).unwrap()
}

pub fn gateway(config: &Config) -> actix_web::web::Data<Gateway> {
    actix_web::web::Data::new(Gateway::from_config(config).unwrap())
}

/// Mint an HS256 token valid for an hour.
pub fn token(user_id: &str, roles: &[&str]) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: Some(user_id.to_string()),
        email: Some(format!("{}@practicas.dev", user_id)),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        exp: (now + 3600) as usize,
        iat: now as usize,
        ..Default::default()
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn bearer(user_id: &str, roles: &[&str]) -> (&'static str, String) {
    ("authorization", format!("Bearer {}", token(user_id, roles)))
}

/// Build the gateway app the way `main` does, minus CORS.
/// Test files pull this in with `#[macro_use] mod common;`.
macro_rules! gateway_app {
    ($config:expr) => {{
        let config: &api_gateway::config::Config = &$config;
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap(api_gateway::middleware::CorrelationIdMiddleware)
                .wrap(api_gateway::middleware::RequestLogger)
                .app_data($crate::common::gateway(config))
                .configure(api_gateway::handlers::configure(&config.api_prefix)),
        )
        .await
    }};
}
