//! Audit sink that writes entries to the tracing pipeline.

use async_trait::async_trait;

use partnerpay_types::{AuditEntry, AuditError, AuditLogger};

/// Emits each audit entry as a structured `tracing` event on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            partner_id = %entry.partner_id,
            action = %entry.action,
            resource_type = entry.resource_type.as_str(),
            resource_id = %entry.resource_id,
            changes = %entry.changes,
            "audit"
        );
        Ok(())
    }
}
