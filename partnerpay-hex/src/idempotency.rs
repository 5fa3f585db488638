//! Idempotent transaction creation.

use std::sync::Arc;

use partnerpay_types::{AppError, NewTransaction, RepoError, Transaction, TransactionStore};

/// Outcome of [`IdempotencyGuard::reserve`].
#[derive(Debug, Clone)]
pub enum Reservation {
    /// A new transaction was stored.
    Created(Transaction),
    /// The key was already used; the stored transaction is returned as-is.
    Existing(Transaction),
}

impl Reservation {
    pub fn is_created(&self) -> bool {
        matches!(self, Reservation::Created(_))
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            Reservation::Created(tx) | Reservation::Existing(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            Reservation::Created(tx) | Reservation::Existing(tx) => tx,
        }
    }
}

/// Deduplicates creation requests by `(partner_id, idempotency_key)`.
///
/// Uniqueness is enforced by the store; the guard turns a uniqueness
/// violation into a re-fetch so that racing callers all see the winner.
pub struct IdempotencyGuard<R: TransactionStore> {
    store: Arc<R>,
}

impl<R: TransactionStore> IdempotencyGuard<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, input), fields(partner_id = %input.partner_id, key = %input.idempotency_key))]
    pub async fn reserve(&self, input: NewTransaction) -> Result<Reservation, AppError> {
        let candidate = Transaction::new(input)?;

        if let Some(existing) = self.find(&candidate).await? {
            return Ok(Reservation::Existing(existing));
        }

        match self.store.insert_transaction(&candidate).await {
            Ok(()) => {
                tracing::info!(transaction_id = %candidate.id, "transaction created");
                Ok(Reservation::Created(candidate))
            }
            Err(RepoError::DuplicateIdempotencyKey) => {
                // Lost the race: another caller inserted between our lookup and insert.
                let existing = self.find(&candidate).await?.ok_or_else(|| {
                    AppError::Conflict(format!(
                        "idempotency key {} is in use but the transaction is not visible",
                        candidate.idempotency_key
                    ))
                })?;
                Ok(Reservation::Existing(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, candidate: &Transaction) -> Result<Option<Transaction>, AppError> {
        let existing = self
            .store
            .get_transaction_by_idempotency_key(candidate.partner_id, &candidate.idempotency_key)
            .await?;

        if let Some(existing) = &existing {
            if existing.amount != candidate.amount {
                tracing::warn!(
                    transaction_id = %existing.id,
                    stored_amount = existing.amount.amount(),
                    stored_currency = %existing.amount.currency(),
                    requested_amount = candidate.amount.amount(),
                    requested_currency = %candidate.amount.currency(),
                    "idempotency key reused with a different body; returning stored transaction"
                );
            } else {
                tracing::debug!(transaction_id = %existing.id, "idempotent replay");
            }
        }
        Ok(existing)
    }
}
