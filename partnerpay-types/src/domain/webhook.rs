use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::partner::PartnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEventType {
    #[serde(rename = "payment.completed")]
    PaymentCompleted,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "refund.completed")]
    RefundCompleted,
    #[serde(rename = "transaction.cancelled")]
    TransactionCancelled,
}

impl AsRef<str> for WebhookEventType {
    fn as_ref(&self) -> &str {
        match self {
            Self::PaymentCompleted => "payment.completed",
            Self::PaymentFailed => "payment.failed",
            Self::RefundCompleted => "refund.completed",
            Self::TransactionCancelled => "transaction.cancelled",
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// A partner notification queued after a committed state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub partner_id: PartnerId,
    pub event: WebhookEventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl WebhookNotification {
    pub fn new(partner_id: PartnerId, event: WebhookEventType, payload: serde_json::Value) -> Self {
        Self {
            partner_id,
            event,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Body delivered to the partner endpoint.
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "event": self.event,
            "created_at": self.created_at,
            "data": self.payload,
        })
    }
}
