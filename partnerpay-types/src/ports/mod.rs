//! Port traits (interfaces for adapters).
//!
//! The application layer depends on these traits, not on concrete stores,
//! gateways or audit sinks.

mod audit;
mod gateway;
mod store;

pub use audit::{AuditError, AuditLogger};
pub use gateway::{GatewayError, PaymentGateway};
pub use store::{PartnerRepository, TransactionStore};
