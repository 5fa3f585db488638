//! Error types for the payments engine.

use crate::domain::{Currency, RefundId, TransactionId};

/// Domain-level errors (value and lifecycle rule violations).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Amount {amount} is outside the accepted range of 1..=10000000 minor units")]
    AmountOutOfRange { amount: i64 },

    #[error("Unsupported currency: {0:?}")]
    UnsupportedCurrency(String),

    #[error("Currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },

    #[error("Subtraction would be negative: {minuend} - {subtrahend}")]
    NegativeResult { minuend: i64, subtrahend: i64 },

    #[error("Invalid state transition for {entity}: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Transaction has reached the maximum of {max} retries")]
    MaxRetriesExceeded { max: u32 },

    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
}

impl DomainError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        DomainError::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Idempotency key already used by this partner")]
    DuplicateIdempotencyKey,

    #[error("Refund of {requested} exceeds refundable balance {available}")]
    RefundLimitExceeded { requested: i64, available: i64 },
}

/// Caller-facing errors.
///
/// Every variant carries a stable code (see [`AppError::code`]) and maps
/// cleanly to an HTTP status in the inbound adapter.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Partner is inactive")]
    PartnerInactive,

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Refund not allowed for a transaction in status {status}")]
    RefundNotAllowed { status: String },

    #[error("Refund window of 90 days has expired")]
    RefundWindowExpired,

    #[error("Refund amount exceeds refundable balance: requested {requested}, available {available}")]
    RefundAmountExceeded { requested: i64, available: i64 },

    #[error("Maximum retries exceeded ({max})")]
    MaxRetriesExceeded { max: u32 },

    #[error("Currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Dependency failure: {0}")]
    Dependency(String),

    #[error(
        "Refund {refund_id} completed but transaction {transaction_id} could not be updated: {reason}"
    )]
    ConsistencyWarning {
        transaction_id: TransactionId,
        refund_id: RefundId,
        reason: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::PartnerInactive => "PARTNER_INACTIVE",
            AppError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            AppError::RefundNotAllowed { .. } => "REFUND_NOT_ALLOWED",
            AppError::RefundWindowExpired => "REFUND_WINDOW_EXPIRED",
            AppError::RefundAmountExceeded { .. } => "REFUND_AMOUNT_EXCEEDED",
            AppError::MaxRetriesExceeded { .. } => "MAX_RETRIES_EXCEEDED",
            AppError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Dependency(_) => "DEPENDENCY_ERROR",
            AppError::ConsistencyWarning { .. } => "CONSISTENCY_WARNING",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::CurrencyMismatch { expected, got } => {
                AppError::CurrencyMismatch { expected, got }
            }
            DomainError::InvalidStateTransition { .. } => {
                AppError::InvalidStateTransition(err.to_string())
            }
            DomainError::MaxRetriesExceeded { max } => AppError::MaxRetriesExceeded { max },
            DomainError::AmountOutOfRange { .. }
            | DomainError::UnsupportedCurrency(_)
            | DomainError::NegativeResult { .. }
            | DomainError::Validation { .. } => AppError::Validation(err.to_string()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(e) => e.into(),
            RepoError::NotFound => AppError::NotFound("Resource not found".into()),
            RepoError::Conflict(e) => AppError::Conflict(e),
            RepoError::DuplicateIdempotencyKey => AppError::Conflict(err.to_string()),
            RepoError::RefundLimitExceeded {
                requested,
                available,
            } => AppError::RefundAmountExceeded {
                requested,
                available,
            },
            RepoError::Database(e) | RepoError::Transaction(e) => AppError::Dependency(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_caller_taxonomy() {
        let err: AppError = DomainError::MaxRetriesExceeded { max: 3 }.into();
        assert_eq!(err.code(), "MAX_RETRIES_EXCEEDED");

        let err: AppError = DomainError::AmountOutOfRange { amount: 0 }.into();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let err: AppError = DomainError::CurrencyMismatch {
            expected: Currency::USD,
            got: Currency::EUR,
        }
        .into();
        assert_eq!(err.code(), "CURRENCY_MISMATCH");
    }

    #[test]
    fn test_store_failures_are_dependency_errors() {
        let err: AppError = RepoError::Database("connection reset".into()).into();
        assert!(matches!(err, AppError::Dependency(_)));

        let err: AppError = RepoError::RefundLimitExceeded {
            requested: 6000,
            available: 4000,
        }
        .into();
        assert_eq!(err.code(), "REFUND_AMOUNT_EXCEEDED");
    }
}
