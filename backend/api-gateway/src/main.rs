use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use api_gateway::config::{Config, CorsConfig, LogFormat};
use api_gateway::handlers;
use api_gateway::middleware::{CorrelationIdMiddleware, RequestLogger};
use api_gateway::Gateway;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

/// How often idle rate-limit windows are swept
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,api_gateway=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_thread_ids(true)
                    .with_target(true),
            )
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

fn build_cors(config: &CorsConfig) -> Cors {
    let mut cors = Cors::default();
    for origin in &config.allowed_origins {
        if origin == "*" {
            cors = cors.allow_any_origin();
        } else {
            cors = cors.allowed_origin(origin);
        }
    }
    cors.allow_any_method().allow_any_header().max_age(3600)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    info!("Starting API Gateway...");

    let gateway = web::Data::new(Gateway::from_config(&config)?);
    info!(
        api_prefix = %config.api_prefix,
        services = gateway.registry().len(),
        request_timeout_ms = config.proxy.request_timeout.as_millis() as u64,
        "Gateway initialized"
    );
    for entry in gateway.registry().iter() {
        debug!(service = %entry.logical_name, base_url = %entry.base_url, "Registered downstream");
    }

    // Idle client windows are removed so the limiter does not grow without bound
    let limiter = gateway.limiter().clone();
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            limiter.purge_expired(Instant::now());
        }
    });

    let bind_addr = (config.server.host.clone(), config.server.port);
    info!("API Gateway starting on http://{}:{}", bind_addr.0, bind_addr.1);

    let api_prefix = config.api_prefix.clone();
    let cors_config = config.cors.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(CorrelationIdMiddleware)
            .wrap(RequestLogger)
            .wrap(build_cors(&cors_config))
            .app_data(gateway.clone())
            .configure(handlers::configure(&api_prefix))
    })
    .workers(config.server.workers)
    .bind(bind_addr)
    .context("Failed to bind server address")?
    .run()
    .await
    .context("Server terminated with an error")
}
