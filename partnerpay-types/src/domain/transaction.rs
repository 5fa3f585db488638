//! Transaction aggregate and its lifecycle state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::money::Money;
use super::partner::PartnerId;
use super::payment::{PaymentMethod, PaymentProvider};
use crate::error::DomainError;

/// Retries allowed after the first failed attempt.
pub const MAX_RETRIES: u32 = 3;

/// Days after completion during which a refund may be requested.
pub const REFUND_WINDOW_DAYS: i64 = 90;

/// Longest accepted idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Unique identifier for a Transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Creates a new random TransactionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a TransactionId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the UUID value.
    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Where a transaction is in its lifecycle.
///
/// `Processing` is the only transient state; every other state is a rest state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    PartiallyRefunded,
    Refunded,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartiallyRefunded => "partially_refunded",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partially_refunded" => Ok(Self::PartiallyRefunded),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::validation(
                "status",
                format!("unknown transaction status {other:?}"),
            )),
        }
    }
}

/// Fields a caller supplies when creating a transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub partner_id: PartnerId,
    pub amount: Money,
    pub idempotency_key: String,
    pub payment_method: PaymentMethod,
    pub provider: PaymentProvider,
    pub description: Option<String>,
}

/// A partner's payment, the aggregate root of the engine.
///
/// Status only changes through the guarded `mark_as_*` methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub partner_id: PartnerId,
    pub amount: Money,
    pub idempotency_key: String,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    pub provider: PaymentProvider,
    pub provider_transaction_id: Option<String>,
    pub description: Option<String>,
    /// Cached sum of completed refunds, in minor units.
    pub refunded_amount: i64,
    pub retry_count: u32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by the store on every update.
    pub version: i64,
}

impl Transaction {
    /// Creates a pending transaction after validating the request fields.
    pub fn new(input: NewTransaction) -> Result<Self, DomainError> {
        let key = input.idempotency_key.trim();
        if key.is_empty() {
            return Err(DomainError::validation("idempotency_key", "cannot be empty"));
        }
        if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(DomainError::validation(
                "idempotency_key",
                format!("cannot exceed {MAX_IDEMPOTENCY_KEY_LEN} characters"),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: TransactionId::new(),
            partner_id: input.partner_id,
            amount: input.amount,
            idempotency_key: key.to_string(),
            status: TransactionStatus::Pending,
            payment_method: input.payment_method,
            provider: input.provider,
            provider_transaction_id: None,
            description: input.description,
            refunded_amount: 0,
            retry_count: 0,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            deleted_at: None,
            version: 0,
        })
    }

    fn transition(&mut self, to: TransactionStatus) -> Result<(), DomainError> {
        use TransactionStatus::*;

        let allowed = matches!(
            (self.status, to),
            (Pending, Processing)
                | (Failed, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, PartiallyRefunded)
                | (Completed, Refunded)
                | (PartiallyRefunded, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
                | (Pending, Cancelled)
        );
        if !allowed {
            return Err(DomainError::InvalidStateTransition {
                entity: "transaction",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `pending | failed -> processing`.
    pub fn mark_as_processing(&mut self) -> Result<(), DomainError> {
        self.transition(TransactionStatus::Processing)
    }

    /// `processing -> completed`; clears any error from an earlier attempt.
    pub fn mark_as_completed(
        &mut self,
        provider_transaction_id: impl Into<String>,
    ) -> Result<(), DomainError> {
        self.transition(TransactionStatus::Completed)?;
        self.provider_transaction_id = Some(provider_transaction_id.into());
        self.completed_at = Some(self.updated_at);
        self.error_code = None;
        self.error_message = None;
        Ok(())
    }

    /// `processing -> failed`. Retry accounting is separate.
    pub fn mark_as_failed(
        &mut self,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), DomainError> {
        self.transition(TransactionStatus::Failed)?;
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self.failed_at = Some(self.updated_at);
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < MAX_RETRIES
    }

    pub fn increment_retry_count(&mut self) -> Result<(), DomainError> {
        if !self.can_retry() {
            return Err(DomainError::MaxRetriesExceeded { max: MAX_RETRIES });
        }
        self.retry_count += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Records the outcome of a completed refund.
    ///
    /// `completed -> partially_refunded | refunded`, and from
    /// `partially_refunded` onward only toward `refunded`.
    pub fn mark_as_refunded(&mut self, is_partial: bool) -> Result<(), DomainError> {
        let to = if is_partial {
            TransactionStatus::PartiallyRefunded
        } else {
            TransactionStatus::Refunded
        };
        self.transition(to)
    }

    /// `pending -> cancelled`.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.transition(TransactionStatus::Cancelled)
    }

    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the status admits another refund.
    pub fn status_allows_refund(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Completed | TransactionStatus::PartiallyRefunded
        )
    }

    /// Whether `now` is within the refund window. Exactly 90 days after
    /// completion is still inside.
    pub fn within_refund_window(&self, now: DateTime<Utc>) -> bool {
        match self.completed_at {
            Some(completed_at) => now - completed_at <= Duration::days(REFUND_WINDOW_DAYS),
            None => false,
        }
    }

    pub fn is_refundable(&self, now: DateTime<Utc>) -> bool {
        self.status_allows_refund() && self.within_refund_window(now)
    }

    /// Amount still available for refunds, in minor units.
    pub fn refundable_balance(&self) -> i64 {
        (self.amount.amount() - self.refunded_amount).max(0)
    }
}
