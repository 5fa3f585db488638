//! Refund admission and execution.
//!
//! The refund invariant is that completed refunds never exceed the original
//! amount, under any interleaving. Two layers protect it:
//!
//! - a per-transaction async mutex serializes admission, gateway call and
//!   settlement within this process;
//! - [`TransactionStore::reserve_refund`] admits atomically in the store,
//!   counting in-flight refunds, which covers other processes.
//!
//! The locked section runs on its own task. A caller that goes away (an HTTP
//! client disconnecting, say) cannot strand a reservation half way through.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::Instrument;

use partnerpay_types::{
    AppError, AuditEntry, Money, PartnerId, PaymentGateway, Refund, RefundRequest,
    RefundResponse, ResourceType, Transaction, TransactionId, TransactionStatus, TransactionStore,
    WebhookEventType,
};

use crate::effects::Effects;

/// Gateway failure code recorded on a failed refund.
pub const REFUND_FAILED: &str = "REFUND_FAILED";

/// Recorded on a refund abandoned before the provider answered, e.g. when
/// the store rejected the `processing` write.
pub const REFUND_ABORTED: &str = "REFUND_ABORTED";

/// A reserved refund that did not go through.
struct Aborted {
    code: &'static str,
    message: String,
    error: AppError,
}

impl Aborted {
    fn internal(error: AppError) -> Self {
        Self {
            code: REFUND_ABORTED,
            message: error.to_string(),
            error,
        }
    }
}

pub struct RefundEngine<R: TransactionStore> {
    store: Arc<R>,
    gateway: Arc<dyn PaymentGateway>,
    effects: Effects,
    locks: Arc<DashMap<TransactionId, Arc<Mutex<()>>>>,
}

impl<R: TransactionStore> Clone for RefundEngine<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            effects: self.effects.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<R: TransactionStore> RefundEngine<R> {
    pub(crate) fn new(store: Arc<R>, gateway: Arc<dyn PaymentGateway>, effects: Effects) -> Self {
        Self {
            store,
            gateway,
            effects,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Refunds part or all of a transaction on behalf of its owner.
    #[tracing::instrument(skip(self, req), fields(amount = req.amount, currency = %req.currency))]
    pub async fn request_refund(
        &self,
        partner_id: PartnerId,
        transaction_id: TransactionId,
        req: &RefundRequest,
    ) -> Result<Refund, AppError> {
        let tx = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {transaction_id}")))?;

        if tx.partner_id != partner_id {
            return Err(AppError::Unauthorized(format!(
                "Transaction {transaction_id} belongs to another partner"
            )));
        }
        if tx.status == TransactionStatus::Refunded {
            // Fully refunded: the balance, not the status, is what the caller ran into.
            return Err(AppError::RefundAmountExceeded {
                requested: req.amount,
                available: 0,
            });
        }
        if !tx.status_allows_refund() {
            return Err(AppError::RefundNotAllowed {
                status: tx.status.to_string(),
            });
        }
        if !tx.within_refund_window(Utc::now()) {
            return Err(AppError::RefundWindowExpired);
        }

        let amount = Money::parse(req.amount, &req.currency)?;
        if amount.currency() != tx.amount.currency() {
            return Err(AppError::CurrencyMismatch {
                expected: tx.amount.currency(),
                got: amount.currency(),
            });
        }
        if amount.amount() > tx.amount.amount() {
            return Err(AppError::RefundAmountExceeded {
                requested: amount.amount(),
                available: tx.refundable_balance(),
            });
        }

        let engine = self.clone();
        let reason = req.reason.clone();
        tokio::spawn(
            async move { engine.run_locked(tx, amount, reason).await }.in_current_span(),
        )
        .await
        .map_err(|e| AppError::Internal(format!("refund task failed: {e}")))?
    }

    async fn run_locked(
        &self,
        tx: Transaction,
        amount: Money,
        reason: String,
    ) -> Result<Refund, AppError> {
        let lock = self
            .locks
            .entry(tx.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.admit_and_execute(&tx, amount, &reason).await
        };

        drop(lock);
        self.locks
            .remove_if(&tx.id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn admit_and_execute(
        &self,
        tx: &Transaction,
        amount: Money,
        reason: &str,
    ) -> Result<Refund, AppError> {
        let limit = tx.amount.amount();
        let completed = self.store.sum_completed_refunds(tx.id).await?;
        if completed + amount.amount() > limit {
            return Err(AppError::RefundAmountExceeded {
                requested: amount.amount(),
                available: (limit - completed).max(0),
            });
        }

        let mut refund = Refund::new(tx.id, amount, reason)?;
        self.store.reserve_refund(&refund, limit).await?;

        // From here on the refund holds part of the balance: every exit
        // either completes it or marks it failed.
        let provider_refund_id = match self.submit(tx, &mut refund).await {
            Ok(id) => id,
            Err(aborted) => return Err(self.release(tx, &mut refund, aborted).await),
        };

        // The provider has paid out; the reservation must stand.
        let recorded = match refund.mark_as_completed(provider_refund_id) {
            Ok(()) => self.store.update_refund(&refund).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let settled = match recorded {
            Ok(()) => self.settle(tx.id).await,
            Err(e) => Err(format!("refund completion not recorded: {e}")),
        };
        let settled = settled.map_err(|reason| {
            tracing::error!(
                transaction_id = %tx.id,
                refund_id = %refund.id,
                %reason,
                "provider refunded but local state is behind; needs reconciliation"
            );
            AppError::ConsistencyWarning {
                transaction_id: tx.id,
                refund_id: refund.id,
                reason,
            }
        })?;

        self.effects
            .audit(AuditEntry::new(
                tx.partner_id,
                "refund_completed",
                ResourceType::Refund,
                refund.id.into_uuid(),
                json!({
                    "transaction_id": tx.id,
                    "amount": refund.amount.amount(),
                    "refunded_amount": settled.refunded_amount,
                    "transaction_status": settled.status,
                }),
            ))
            .await;
        self.effects.notify(
            tx.partner_id,
            WebhookEventType::RefundCompleted,
            json!({
                "refund": RefundResponse::from(refund.clone()),
                "transaction_status": settled.status,
                "refundable_balance": settled.refundable_balance(),
            }),
        );

        tracing::info!(
            refund_id = %refund.id,
            status = %settled.status,
            refunded_amount = settled.refunded_amount,
            "refund completed"
        );
        Ok(refund)
    }

    /// Moves a reserved refund to `processing` and asks the provider for it.
    async fn submit(&self, tx: &Transaction, refund: &mut Refund) -> Result<String, Aborted> {
        refund
            .mark_as_processing()
            .map_err(|e| Aborted::internal(e.into()))?;
        self.store
            .update_refund(refund)
            .await
            .map_err(|e| Aborted::internal(e.into()))?;

        self.gateway
            .process_refund(refund, tx)
            .await
            .map_err(|e| Aborted {
                code: REFUND_FAILED,
                message: e.to_string(),
                error: AppError::Dependency(format!("Refund rejected by {}: {}", tx.provider, e)),
            })
    }

    /// Marks an aborted refund failed so its reservation is released.
    /// Returns the error that aborted it.
    async fn release(&self, tx: &Transaction, refund: &mut Refund, aborted: Aborted) -> AppError {
        tracing::warn!(
            refund_id = %refund.id,
            code = aborted.code,
            "refund aborted: {}", aborted.message
        );

        match refund.mark_as_failed(aborted.code, aborted.message.clone()) {
            Ok(()) => {
                if let Err(e) = self.store.update_refund(refund).await {
                    tracing::error!(
                        refund_id = %refund.id,
                        "failed to release refund reservation: {}", e
                    );
                }
            }
            Err(e) => tracing::error!(refund_id = %refund.id, "cannot mark refund failed: {}", e),
        }

        self.effects
            .audit(AuditEntry::new(
                tx.partner_id,
                "refund_failed",
                ResourceType::Refund,
                refund.id.into_uuid(),
                json!({
                    "transaction_id": tx.id,
                    "amount": refund.amount.amount(),
                    "error_code": aborted.code,
                    "error_message": aborted.message,
                }),
            ))
            .await;
        aborted.error
    }

    /// Folds the completed refund total back into the parent transaction.
    async fn settle(&self, transaction_id: TransactionId) -> Result<Transaction, String> {
        let mut tx = self
            .store
            .get_transaction(transaction_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "transaction is no longer visible".to_string())?;

        let total = self
            .store
            .sum_completed_refunds(transaction_id)
            .await
            .map_err(|e| e.to_string())?;

        tx.mark_as_refunded(total < tx.amount.amount())
            .map_err(|e| e.to_string())?;
        tx.refunded_amount = total;
        self.store
            .update_transaction(&mut tx)
            .await
            .map_err(|e| e.to_string())?;
        Ok(tx)
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
