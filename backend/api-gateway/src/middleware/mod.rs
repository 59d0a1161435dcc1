//! Gateway middleware and pipeline stages

pub mod correlation_id;
pub mod jwt;
pub mod logging;
pub mod rate_limit;

pub use correlation_id::{CorrelationId, CorrelationIdMiddleware};
pub use jwt::{Claims, Identity, TokenVerifier};
pub use logging::RequestLogger;
pub use rate_limit::{RateLimitConfig, RateLimiter};
