//! # PartnerPay Types
//!
//! Domain types and port traits for the partner payments engine.
//! This crate has ZERO IO dependencies - only data structures,
//! lifecycle rules, and trait definitions.
//!
//! ## Architecture
//!
//! This crate is the **innermost core** of the hexagonal architecture:
//! - `domain/` - Money, the transaction and refund state machines, partners
//! - `ports/` - Traits that stores, gateways and audit sinks implement
//! - `dto/` - Data Transfer Objects for API boundaries
//! - `error/` - Domain, repository and caller-facing error types

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

pub use domain::{
    AuditEntry, Currency, Money, NewPartner, NewTransaction, Partner, PartnerId, PaymentMethod,
    PaymentProvider, Refund, RefundId, RefundStatus, ResourceType, Transaction, TransactionId,
    TransactionStatus, WebhookEventType, WebhookNotification,
};
pub use dto::*;
pub use error::{AppError, DomainError, RepoError};
pub use ports::{
    AuditError, AuditLogger, GatewayError, PartnerRepository, PaymentGateway, TransactionStore,
};
