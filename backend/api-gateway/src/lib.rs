//! API Gateway Library
//! Re-exports modules for testing and integration

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod registry;
pub mod routes;

pub use config::Config;
pub use error::{GatewayError, ProxyError};
pub use gateway::Gateway;
