//! Durable store ports.

use crate::domain::{
    NewPartner, Partner, PartnerId, Refund, RefundId, Transaction, TransactionId,
};
use crate::dto::ListTransactionsQuery;
use crate::error::RepoError;

/// Persistence of transactions and their refunds.
///
/// Rows with `deleted_at` set are invisible to every read.
#[async_trait::async_trait]
pub trait TransactionStore: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Inserts a new transaction.
    ///
    /// Fails with [`RepoError::DuplicateIdempotencyKey`] when a live row with
    /// the same `(partner_id, idempotency_key)` already exists.
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), RepoError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, RepoError>;

    async fn get_transaction_by_idempotency_key(
        &self,
        partner_id: PartnerId,
        key: &str,
    ) -> Result<Option<Transaction>, RepoError>;

    /// Newest first.
    async fn list_transactions(
        &self,
        partner_id: PartnerId,
        query: &ListTransactionsQuery,
    ) -> Result<Vec<Transaction>, RepoError>;

    /// Writes `tx` if the stored version still equals `tx.version`, then bumps
    /// `tx.version`. A stale version fails with [`RepoError::Conflict`].
    async fn update_transaction(&self, tx: &mut Transaction) -> Result<(), RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Refunds
    // ─────────────────────────────────────────────────────────────────────────────

    /// Atomically admits and inserts a pending refund.
    ///
    /// Succeeds only if completed plus in-flight refunds for the parent, plus
    /// this one, stay within `limit`; otherwise nothing is written and
    /// [`RepoError::RefundLimitExceeded`] is returned.
    async fn reserve_refund(&self, refund: &Refund, limit: i64) -> Result<(), RepoError>;

    async fn update_refund(&self, refund: &Refund) -> Result<(), RepoError>;

    async fn get_refund(&self, id: RefundId) -> Result<Option<Refund>, RepoError>;

    /// Oldest first.
    async fn list_refunds(&self, transaction_id: TransactionId) -> Result<Vec<Refund>, RepoError>;

    /// Sum of completed refund amounts in minor units.
    async fn sum_completed_refunds(&self, transaction_id: TransactionId) -> Result<i64, RepoError>;
}

/// Partner lookup and registration.
#[async_trait::async_trait]
pub trait PartnerRepository: Send + Sync + 'static {
    /// Registers a partner and returns it with its raw API key (shown once).
    async fn create_partner(&self, partner: NewPartner) -> Result<(Partner, String), RepoError>;

    async fn get_partner(&self, id: PartnerId) -> Result<Option<Partner>, RepoError>;

    async fn find_partner_by_api_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<Partner>, RepoError>;

    /// Returns false if the partner does not exist.
    async fn set_partner_active(&self, id: PartnerId, active: bool) -> Result<bool, RepoError>;
}
