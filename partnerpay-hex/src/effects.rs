//! Best-effort side effects that follow a committed state change.

use std::sync::Arc;

use partnerpay_types::{
    AuditEntry, AuditLogger, PartnerId, WebhookEventType, WebhookNotification,
};

use crate::outbound::NotificationQueue;

/// Audit and notification sinks shared by the services.
///
/// Neither can fail the caller: errors are logged and dropped.
#[derive(Clone)]
pub(crate) struct Effects {
    audit: Arc<dyn AuditLogger>,
    notifications: Option<NotificationQueue>,
}

impl Effects {
    pub fn new(audit: Arc<dyn AuditLogger>, notifications: Option<NotificationQueue>) -> Self {
        Self {
            audit,
            notifications,
        }
    }

    pub async fn audit(&self, entry: AuditEntry) {
        let action = entry.action.clone();
        let resource_id = entry.resource_id;
        if let Err(e) = self.audit.record(entry).await {
            tracing::warn!(%action, %resource_id, "audit record failed: {}", e);
        }
    }

    pub fn notify(&self, partner_id: PartnerId, event: WebhookEventType, payload: serde_json::Value) {
        if let Some(queue) = &self.notifications {
            queue.enqueue(WebhookNotification::new(partner_id, event, payload));
        }
    }
}
