//! Data Transfer Objects (DTOs) for requests and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{
    Currency, PartnerId, PaymentMethod, PaymentProvider, Refund, RefundId, RefundStatus,
    Transaction, TransactionId, TransactionStatus,
};

// ─────────────────────────────────────────────────────────────────────────────
// Transaction DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to create a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTransactionRequest {
    /// Amount in smallest currency unit
    #[schema(example = 10000)]
    pub amount: i64,
    /// ISO 4217 code, must be an active currency
    #[schema(example = "USD")]
    pub currency: String,
    #[schema(example = "card")]
    pub payment_method: String,
    #[schema(example = "stripe")]
    pub provider: String,
    /// Deduplication key, unique per partner. May also be sent as the
    /// `Idempotency-Key` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "order-2024-0001")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Transaction as returned to partners.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub id: TransactionId,
    pub partner_id: PartnerId,
    #[schema(example = 10000)]
    pub amount: i64,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    pub provider: PaymentProvider,
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sum of completed refunds in smallest currency unit
    pub refunded_amount: i64,
    /// Amount still available for refunds
    pub refundable_balance: i64,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<Transaction> for TransactionResponse {
    fn from(tx: Transaction) -> Self {
        let refundable_balance = tx.refundable_balance();
        Self {
            id: tx.id,
            partner_id: tx.partner_id,
            amount: tx.amount.amount(),
            currency: tx.amount.currency(),
            status: tx.status,
            payment_method: tx.payment_method,
            provider: tx.provider,
            idempotency_key: tx.idempotency_key,
            provider_transaction_id: tx.provider_transaction_id,
            description: tx.description,
            refunded_amount: tx.refunded_amount,
            refundable_balance,
            retry_count: tx.retry_count,
            error_code: tx.error_code,
            error_message: tx.error_message,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            completed_at: tx.completed_at,
            failed_at: tx.failed_at,
        }
    }
}

/// Filters for listing a partner's transactions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ListTransactionsQuery {
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    /// Page size, 1..=100 (default 20)
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl ListTransactionsQuery {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Refund DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to refund part or all of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundRequest {
    /// Amount to refund in smallest currency unit
    #[schema(example = 3000)]
    pub amount: i64,
    /// Must match the transaction's currency
    #[schema(example = "USD")]
    pub currency: String,
    #[schema(example = "customer returned item")]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundResponse {
    pub id: RefundId,
    pub transaction_id: TransactionId,
    #[schema(example = 3000)]
    pub amount: i64,
    pub currency: Currency,
    pub status: RefundStatus,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_refund_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<Refund> for RefundResponse {
    fn from(refund: Refund) -> Self {
        Self {
            id: refund.id,
            transaction_id: refund.transaction_id,
            amount: refund.amount.amount(),
            currency: refund.amount.currency(),
            status: refund.status,
            reason: refund.reason,
            provider_refund_id: refund.provider_refund_id,
            error_code: refund.error_code,
            error_message: refund.error_message,
            created_at: refund.created_at,
            processed_at: refund.processed_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Refund window of 90 days has expired")]
    pub error: String,
    #[schema(example = "REFUND_WINDOW_EXPIRED")]
    pub code: String,
    #[schema(example = 422)]
    pub status: u16,
}
