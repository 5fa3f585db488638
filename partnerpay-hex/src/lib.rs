//! # PartnerPay Hex
//!
//! Application services and adapters for the partner payments engine.
//!
//! ## Architecture
//!
//! - `service` - Transaction lifecycle orchestration
//! - `idempotency` - Deduplicated transaction creation
//! - `refund` - Refund admission and execution under concurrency
//! - `outbound/` - Payment gateways, audit sinks, webhook delivery
//! - `inbound/` - HTTP adapter (Axum server)
//!
//! Services are generic over the store (`R: TransactionStore`), so any
//! repository implementation can be injected.

mod effects;
pub mod idempotency;
pub mod inbound;
pub mod openapi;
pub mod outbound;
pub mod refund;
pub mod service;

#[cfg(test)]
mod service_tests;

pub use idempotency::{IdempotencyGuard, Reservation};
pub use refund::RefundEngine;
pub use service::PaymentService;
