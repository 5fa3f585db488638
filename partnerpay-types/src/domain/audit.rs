//! Audit trail records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::partner::PartnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Transaction,
    Refund,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Refund => "refund",
        }
    }
}

/// One committed state change, as seen by auditors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub partner_id: PartnerId,
    pub action: String,
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
    pub changes: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        partner_id: PartnerId,
        action: impl Into<String>,
        resource_type: ResourceType,
        resource_id: Uuid,
        changes: serde_json::Value,
    ) -> Self {
        Self {
            partner_id,
            action: action.into(),
            resource_type,
            resource_id,
            changes,
            created_at: Utc::now(),
        }
    }
}
