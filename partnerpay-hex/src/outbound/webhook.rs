//! Partner webhook notifications.
//!
//! The service enqueues notifications after a state change commits; a
//! [`WebhookDispatcher`] drains the queue on its own task and POSTs each one
//! to the partner's endpoint. Delivery is best effort.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use partnerpay_repo::security::sign_webhook;
use partnerpay_types::{PartnerRepository, WebhookNotification};

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-PartnerPay-Signature";

/// Sending half of the bounded notification channel.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<WebhookNotification>,
}

impl NotificationQueue {
    /// Creates a queue and the receiver the dispatcher consumes.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<WebhookNotification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues without waiting. A full or closed queue drops the notification.
    pub fn enqueue(&self, notification: WebhookNotification) {
        let event = notification.event;
        let partner_id = notification.partner_id;
        match self.tx.try_send(notification) {
            Ok(()) => debug!(%event, %partner_id, "notification queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%event, %partner_id, "notification queue full, dropping")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%event, %partner_id, "notification queue closed, dropping")
            }
        }
    }
}

/// Delivers queued notifications to partner webhook URLs.
pub struct WebhookDispatcher<R: PartnerRepository> {
    partners: Arc<R>,
    client: reqwest::Client,
    rx: mpsc::Receiver<WebhookNotification>,
}

impl<R: PartnerRepository> WebhookDispatcher<R> {
    pub fn new(
        partners: Arc<R>,
        rx: mpsc::Receiver<WebhookNotification>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            partners,
            client,
            rx,
        })
    }

    /// Runs until every [`NotificationQueue`] handle is dropped.
    pub async fn run(mut self) {
        info!("Starting webhook dispatcher");
        while let Some(notification) = self.rx.recv().await {
            self.deliver(notification).await;
        }
        info!("Webhook dispatcher stopped");
    }

    #[instrument(skip(self, notification), fields(event = %notification.event, partner_id = %notification.partner_id))]
    async fn deliver(&self, notification: WebhookNotification) {
        let partner = match self.partners.get_partner(notification.partner_id).await {
            Ok(Some(partner)) => partner,
            Ok(None) => {
                warn!("partner not found, dropping notification");
                return;
            }
            Err(e) => {
                error!("failed to load partner: {}", e);
                return;
            }
        };

        let Some(url) = partner.webhook_url.as_deref() else {
            debug!("partner has no webhook url");
            return;
        };

        let body = match serde_json::to_vec(&notification.body()) {
            Ok(body) => body,
            Err(e) => {
                error!("failed to encode notification: {}", e);
                return;
            }
        };
        let signature = sign_webhook(&body, &partner.webhook_secret);

        let result = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => info!(%url, "webhook delivered"),
            Ok(resp) => warn!(%url, status = %resp.status(), "webhook rejected"),
            Err(e) => warn!(%url, "webhook delivery failed: {}", e),
        }
    }
}
