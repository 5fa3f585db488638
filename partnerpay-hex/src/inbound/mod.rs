//! HTTP Inbound Adapter
//!
//! Axum-based HTTP server that drives the application layer.

mod auth;
mod error;
pub(crate) mod handlers;
mod rate_limit;
mod server;

pub use auth::AuthenticatedPartner;
pub use error::ApiError;
pub use rate_limit::RateLimiterState;
pub use server::HttpServer;
