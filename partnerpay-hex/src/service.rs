//! Payment Application Service
//!
//! Orchestrates the transaction lifecycle through the store, gateway and
//! audit ports. Contains NO infrastructure logic - pure business orchestration.

use std::sync::Arc;

use serde_json::json;

use partnerpay_repo::security::hash_api_key;
use partnerpay_types::{
    AppError, AuditEntry, AuditLogger, CreateTransactionRequest, ListTransactionsQuery, Money,
    NewTransaction, Partner, PartnerId, PartnerRepository, PaymentGateway, Refund, RefundRequest,
    ResourceType, Transaction, TransactionId, TransactionResponse, TransactionStatus,
    TransactionStore, WebhookEventType,
};

use crate::effects::Effects;
use crate::idempotency::{IdempotencyGuard, Reservation};
use crate::outbound::NotificationQueue;
use crate::refund::RefundEngine;

/// Error code recorded on a transaction whose charge the provider rejected.
pub const PAYMENT_FAILED: &str = "PAYMENT_FAILED";

/// Application service for payment operations.
///
/// Generic over the store so that adapters are injected at compile time:
/// the in-memory store in tests, SQL stores in production.
pub struct PaymentService<R: TransactionStore + PartnerRepository> {
    store: Arc<R>,
    gateway: Arc<dyn PaymentGateway>,
    effects: Effects,
    idempotency: IdempotencyGuard<R>,
    refunds: RefundEngine<R>,
}

impl<R: TransactionStore + PartnerRepository> PaymentService<R> {
    /// Creates a service. Notifications are skipped when no queue is given.
    pub fn new(
        store: Arc<R>,
        gateway: Arc<dyn PaymentGateway>,
        audit: Arc<dyn AuditLogger>,
        notifications: Option<NotificationQueue>,
    ) -> Self {
        let effects = Effects::new(audit, notifications);
        Self {
            idempotency: IdempotencyGuard::new(store.clone()),
            refunds: RefundEngine::new(store.clone(), gateway.clone(), effects.clone()),
            store,
            gateway,
            effects,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &Arc<R> {
        &self.store
    }

    pub fn refund_engine(&self) -> &RefundEngine<R> {
        &self.refunds
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Partners
    // ─────────────────────────────────────────────────────────────────────────────

    /// Resolves a raw API key to an active partner.
    pub async fn authenticate(&self, api_key: &str) -> Result<Partner, AppError> {
        let partner = self
            .store
            .find_partner_by_api_key_hash(&hash_api_key(api_key))
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid API key".into()))?;

        if !partner.is_active {
            return Err(AppError::PartnerInactive);
        }
        Ok(partner)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Creates a transaction, or returns the one already stored under the
    /// same idempotency key.
    #[tracing::instrument(skip(self, req), fields(amount = req.amount, currency = %req.currency))]
    pub async fn create_transaction(
        &self,
        partner_id: PartnerId,
        req: CreateTransactionRequest,
    ) -> Result<Reservation, AppError> {
        let idempotency_key = req
            .idempotency_key
            .ok_or_else(|| AppError::Validation("idempotency_key is required".into()))?;

        let input = NewTransaction {
            partner_id,
            amount: Money::parse(req.amount, &req.currency)?,
            idempotency_key,
            payment_method: req.payment_method.parse()?,
            provider: req.provider.parse()?,
            description: req.description,
        };

        let reservation = self.idempotency.reserve(input).await?;
        if let Reservation::Created(tx) = &reservation {
            self.audit_transaction(tx, "transaction_created", json!({ "status": tx.status }))
                .await;
        }
        Ok(reservation)
    }

    /// Gets a transaction owned by `partner_id`.
    #[tracing::instrument(skip(self))]
    pub async fn get_transaction(
        &self,
        partner_id: PartnerId,
        id: TransactionId,
    ) -> Result<Transaction, AppError> {
        let tx = self
            .store
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {id}")))?;

        if tx.partner_id != partner_id {
            return Err(AppError::Unauthorized(format!(
                "Transaction {id} belongs to another partner"
            )));
        }
        Ok(tx)
    }

    /// Lists a partner's transactions, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        partner_id: PartnerId,
        query: &ListTransactionsQuery,
    ) -> Result<Vec<Transaction>, AppError> {
        self.store
            .list_transactions(partner_id, query)
            .await
            .map_err(Into::into)
    }

    /// Charges a pending transaction through its provider.
    #[tracing::instrument(skip(self))]
    pub async fn process_transaction(
        &self,
        partner_id: PartnerId,
        id: TransactionId,
    ) -> Result<Transaction, AppError> {
        let tx = self.get_transaction(partner_id, id).await?;
        if tx.status != TransactionStatus::Pending {
            return Err(AppError::InvalidStateTransition(format!(
                "only pending transactions can be processed, transaction is {}",
                tx.status
            )));
        }
        self.charge(tx).await
    }

    /// Charges a failed transaction again, up to the retry limit.
    #[tracing::instrument(skip(self))]
    pub async fn retry_transaction(
        &self,
        partner_id: PartnerId,
        id: TransactionId,
    ) -> Result<Transaction, AppError> {
        let mut tx = self.get_transaction(partner_id, id).await?;
        if tx.status != TransactionStatus::Failed {
            return Err(AppError::InvalidStateTransition(format!(
                "only failed transactions can be retried, transaction is {}",
                tx.status
            )));
        }

        tx.increment_retry_count()?;
        self.store.update_transaction(&mut tx).await?;
        self.audit_transaction(&tx, "payment_retry", json!({ "retry_count": tx.retry_count }))
            .await;

        self.charge(tx).await
    }

    /// Cancels a transaction that has not been processed yet.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_transaction(
        &self,
        partner_id: PartnerId,
        id: TransactionId,
    ) -> Result<Transaction, AppError> {
        let mut tx = self.get_transaction(partner_id, id).await?;
        let from = tx.status;
        tx.cancel()?;
        self.store.update_transaction(&mut tx).await?;

        self.audit_transaction(
            &tx,
            "transaction_cancelled",
            json!({ "from": from, "to": tx.status }),
        )
        .await;
        self.notify_transaction(&tx, WebhookEventType::TransactionCancelled);
        Ok(tx)
    }

    async fn charge(&self, mut tx: Transaction) -> Result<Transaction, AppError> {
        let from = tx.status;
        tx.mark_as_processing()?;
        self.store.update_transaction(&mut tx).await?;

        match self.gateway.process_payment(&tx).await {
            Ok(provider_transaction_id) => {
                tx.mark_as_completed(provider_transaction_id)?;
                self.store.update_transaction(&mut tx).await?;

                self.audit_transaction(
                    &tx,
                    "payment_completed",
                    json!({
                        "from": from,
                        "to": tx.status,
                        "provider_transaction_id": tx.provider_transaction_id,
                    }),
                )
                .await;
                self.notify_transaction(&tx, WebhookEventType::PaymentCompleted);
                tracing::info!(transaction_id = %tx.id, "payment completed");
                Ok(tx)
            }
            Err(e) => {
                tracing::warn!(transaction_id = %tx.id, provider = %tx.provider, "payment rejected: {}", e);
                tx.mark_as_failed(PAYMENT_FAILED, e.to_string())?;
                self.store.update_transaction(&mut tx).await?;

                self.audit_transaction(
                    &tx,
                    "payment_failed",
                    json!({
                        "from": from,
                        "to": tx.status,
                        "error_code": PAYMENT_FAILED,
                        "error_message": e.to_string(),
                    }),
                )
                .await;
                self.notify_transaction(&tx, WebhookEventType::PaymentFailed);
                Err(AppError::Dependency(format!(
                    "Payment rejected by {}: {}",
                    tx.provider, e
                )))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Refunds
    // ─────────────────────────────────────────────────────────────────────────────

    /// Refunds part or all of a completed transaction.
    pub async fn request_refund(
        &self,
        partner_id: PartnerId,
        id: TransactionId,
        req: &RefundRequest,
    ) -> Result<Refund, AppError> {
        self.refunds.request_refund(partner_id, id, req).await
    }

    /// Lists every refund attempt for a transaction, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_refunds(
        &self,
        partner_id: PartnerId,
        id: TransactionId,
    ) -> Result<Vec<Refund>, AppError> {
        let tx = self.get_transaction(partner_id, id).await?;
        self.store.list_refunds(tx.id).await.map_err(Into::into)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Side effects
    // ─────────────────────────────────────────────────────────────────────────────

    async fn audit_transaction(&self, tx: &Transaction, action: &str, changes: serde_json::Value) {
        self.effects
            .audit(AuditEntry::new(
                tx.partner_id,
                action,
                ResourceType::Transaction,
                tx.id.into_uuid(),
                changes,
            ))
            .await;
    }

    fn notify_transaction(&self, tx: &Transaction, event: WebhookEventType) {
        self.effects.notify(
            tx.partner_id,
            event,
            json!(TransactionResponse::from(tx.clone())),
        );
    }
}
