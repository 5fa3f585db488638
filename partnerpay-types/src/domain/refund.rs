//! Refund entity, owned by exactly one transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::money::Money;
use super::transaction::TransactionId;
use crate::error::DomainError;

/// Unique identifier for a Refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct RefundId(Uuid);

impl RefundId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for RefundId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RefundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RefundId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Admitted but not yet settled either way.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RefundStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::validation(
                "status",
                format!("unknown refund status {other:?}"),
            )),
        }
    }
}

/// A full or partial refund of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: RefundId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub status: RefundStatus,
    pub reason: String,
    pub provider_refund_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Refund {
    /// Creates a pending refund.
    pub fn new(
        transaction_id: TransactionId,
        amount: Money,
        reason: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("reason", "cannot be empty"));
        }

        let now = Utc::now();
        Ok(Self {
            id: RefundId::new(),
            transaction_id,
            amount,
            status: RefundStatus::Pending,
            reason,
            provider_refund_id: None,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            deleted_at: None,
        })
    }

    fn invalid(&self, to: RefundStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            entity: "refund",
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// `pending -> processing`.
    pub fn mark_as_processing(&mut self) -> Result<(), DomainError> {
        if self.status != RefundStatus::Pending {
            return Err(self.invalid(RefundStatus::Processing));
        }
        self.status = RefundStatus::Processing;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `processing -> completed`.
    pub fn mark_as_completed(
        &mut self,
        provider_refund_id: impl Into<String>,
    ) -> Result<(), DomainError> {
        if self.status != RefundStatus::Processing {
            return Err(self.invalid(RefundStatus::Completed));
        }
        let now = Utc::now();
        self.status = RefundStatus::Completed;
        self.provider_refund_id = Some(provider_refund_id.into());
        self.processed_at = Some(now);
        self.updated_at = now;
        self.error_code = None;
        self.error_message = None;
        Ok(())
    }

    /// `pending | processing -> failed`.
    pub fn mark_as_failed(
        &mut self,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), DomainError> {
        if !self.status.is_in_flight() {
            return Err(self.invalid(RefundStatus::Failed));
        }
        self.status = RefundStatus::Failed;
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.status == RefundStatus::Completed
    }
}
