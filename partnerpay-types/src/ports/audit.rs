//! Audit sink port.

use crate::domain::AuditEntry;

#[derive(Debug, thiserror::Error)]
#[error("Audit write failed: {0}")]
pub struct AuditError(pub String);

/// Receives a record after every committed state change.
///
/// Best effort: callers log failures and carry on.
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}
