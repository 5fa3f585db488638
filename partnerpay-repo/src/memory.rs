//! In-memory store adapter.
//!
//! All state lives behind one mutex, so every multi-step check (idempotency
//! uniqueness, refund admission, optimistic versions) is atomic. Used by
//! tests and by the `memory://` database URL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use partnerpay_types::{
    AuditEntry, AuditError, AuditLogger, ListTransactionsQuery, NewPartner, Partner, PartnerId,
    PartnerRepository, Refund, RefundId, RefundStatus, RepoError, Transaction, TransactionId,
    TransactionStore,
};

use crate::build_partner;

#[derive(Default)]
struct State {
    transactions: HashMap<TransactionId, Transaction>,
    refunds: HashMap<RefundId, Refund>,
    partners: HashMap<PartnerId, Partner>,
    audit_log: Vec<AuditEntry>,
}

impl State {
    fn live_refunds(&self, transaction_id: TransactionId) -> impl Iterator<Item = &Refund> {
        self.refunds
            .values()
            .filter(move |r| r.transaction_id == transaction_id && r.deleted_at.is_none())
    }

    fn sum_where(&self, transaction_id: TransactionId, keep: impl Fn(RefundStatus) -> bool) -> i64 {
        self.live_refunds(transaction_id)
            .filter(|r| keep(r.status))
            .map(|r| r.amount.amount())
            .sum()
    }
}

/// A thread-safe in-memory store.
///
/// Cloning is cheap and clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, RepoError> {
        self.state
            .lock()
            .map_err(|_| RepoError::Database("memory store lock poisoned".into()))
    }

    /// Audit entries recorded so far, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state()
            .map(|s| s.audit_log.clone())
            .unwrap_or_default()
    }

    /// Number of stored transactions, including soft-deleted ones.
    pub fn transaction_count(&self) -> usize {
        self.state().map(|s| s.transactions.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), RepoError> {
        let mut state = self.state()?;
        let duplicate = state.transactions.values().any(|t| {
            t.partner_id == tx.partner_id
                && t.idempotency_key == tx.idempotency_key
                && t.deleted_at.is_none()
        });
        if duplicate {
            return Err(RepoError::DuplicateIdempotencyKey);
        }
        if state.transactions.contains_key(&tx.id) {
            return Err(RepoError::Conflict(format!("transaction {} exists", tx.id)));
        }
        state.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, RepoError> {
        Ok(self
            .state()?
            .transactions
            .get(&id)
            .filter(|t| t.deleted_at.is_none())
            .cloned())
    }

    async fn get_transaction_by_idempotency_key(
        &self,
        partner_id: PartnerId,
        key: &str,
    ) -> Result<Option<Transaction>, RepoError> {
        Ok(self
            .state()?
            .transactions
            .values()
            .find(|t| {
                t.partner_id == partner_id && t.idempotency_key == key && t.deleted_at.is_none()
            })
            .cloned())
    }

    async fn list_transactions(
        &self,
        partner_id: PartnerId,
        query: &ListTransactionsQuery,
    ) -> Result<Vec<Transaction>, RepoError> {
        let state = self.state()?;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.partner_id == partner_id && t.deleted_at.is_none())
            .filter(|t| query.status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rows
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .collect())
    }

    async fn update_transaction(&self, tx: &mut Transaction) -> Result<(), RepoError> {
        let mut state = self.state()?;
        let stored = state
            .transactions
            .get_mut(&tx.id)
            .ok_or(RepoError::NotFound)?;
        if stored.version != tx.version {
            return Err(RepoError::Conflict(format!(
                "transaction {} was modified concurrently",
                tx.id
            )));
        }
        tx.version += 1;
        *stored = tx.clone();
        Ok(())
    }

    async fn reserve_refund(&self, refund: &Refund, limit: i64) -> Result<(), RepoError> {
        let mut state = self.state()?;
        if !state.transactions.contains_key(&refund.transaction_id) {
            return Err(RepoError::NotFound);
        }
        let reserved = state.sum_where(refund.transaction_id, |s| {
            s == RefundStatus::Completed || s.is_in_flight()
        });
        if reserved + refund.amount.amount() > limit {
            return Err(RepoError::RefundLimitExceeded {
                requested: refund.amount.amount(),
                available: (limit - reserved).max(0),
            });
        }
        state.refunds.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn update_refund(&self, refund: &Refund) -> Result<(), RepoError> {
        let mut state = self.state()?;
        let stored = state.refunds.get_mut(&refund.id).ok_or(RepoError::NotFound)?;
        *stored = refund.clone();
        Ok(())
    }

    async fn get_refund(&self, id: RefundId) -> Result<Option<Refund>, RepoError> {
        Ok(self
            .state()?
            .refunds
            .get(&id)
            .filter(|r| r.deleted_at.is_none())
            .cloned())
    }

    async fn list_refunds(&self, transaction_id: TransactionId) -> Result<Vec<Refund>, RepoError> {
        let state = self.state()?;
        let mut rows: Vec<Refund> = state.live_refunds(transaction_id).cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn sum_completed_refunds(&self, transaction_id: TransactionId) -> Result<i64, RepoError> {
        Ok(self
            .state()?
            .sum_where(transaction_id, |s| s == RefundStatus::Completed))
    }
}

#[async_trait]
impl PartnerRepository for MemoryStore {
    async fn create_partner(&self, input: NewPartner) -> Result<(Partner, String), RepoError> {
        let (partner, raw_key) = build_partner(input)?;
        self.state()?.partners.insert(partner.id, partner.clone());
        Ok((partner, raw_key))
    }

    async fn get_partner(&self, id: PartnerId) -> Result<Option<Partner>, RepoError> {
        Ok(self.state()?.partners.get(&id).cloned())
    }

    async fn find_partner_by_api_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<Partner>, RepoError> {
        Ok(self
            .state()?
            .partners
            .values()
            .find(|p| p.api_key_hash == key_hash)
            .cloned())
    }

    async fn set_partner_active(&self, id: PartnerId, active: bool) -> Result<bool, RepoError> {
        let mut state = self.state()?;
        match state.partners.get_mut(&id) {
            Some(partner) => {
                partner.is_active = active;
                partner.updated_at = chrono::Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AuditLogger for MemoryStore {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.state()
            .map_err(|e| AuditError(e.to_string()))?
            .audit_log
            .push(entry);
        Ok(())
    }
}
