//! Domain models for the payments engine.

pub mod audit;
pub mod money;
pub mod partner;
pub mod payment;
pub mod refund;
pub mod transaction;
pub mod webhook;

pub use audit::{AuditEntry, ResourceType};
pub use money::{Currency, MAX_AMOUNT, MIN_AMOUNT, Money};
pub use partner::{DEFAULT_RATE_LIMIT_PER_MINUTE, NewPartner, Partner, PartnerId};
pub use payment::{PaymentMethod, PaymentProvider};
pub use refund::{Refund, RefundId, RefundStatus};
pub use transaction::{
    MAX_IDEMPOTENCY_KEY_LEN, MAX_RETRIES, NewTransaction, REFUND_WINDOW_DAYS, Transaction,
    TransactionId, TransactionStatus,
};
pub use webhook::{WebhookEventType, WebhookNotification};
