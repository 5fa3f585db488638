//! PostgreSQL store adapter.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use partnerpay_types::{
    AuditEntry, AuditError, AuditLogger, ListTransactionsQuery, NewPartner, Partner, PartnerId,
    PartnerRepository, Refund, RefundId, RepoError, Transaction, TransactionId, TransactionStore,
};

use crate::build_partner;
use crate::types::{DbSum, PartnerRecord, RefundRecord, TransactionRecord, db_err, insert_err, tx_err};

const TRANSACTION_COLUMNS: &str = "id, partner_id, amount, currency, idempotency_key, status, \
     payment_method, provider, provider_transaction_id, description, refunded_amount, \
     retry_count, error_code, error_message, created_at, updated_at, completed_at, failed_at, \
     deleted_at, version";

const REFUND_COLUMNS: &str = "id, transaction_id, amount, currency, status, reason, \
     provider_refund_id, error_code, error_message, created_at, updated_at, processed_at, \
     deleted_at";

const PARTNER_COLUMNS: &str = "id, name, email, api_key_hash, api_key_prefix, is_active, \
     rate_limit_per_minute, webhook_url, webhook_secret, created_at, updated_at";

// ─────────────────────────────────────────────────────────────────────────────
// PostgreSQL Store
// ─────────────────────────────────────────────────────────────────────────────

/// PostgreSQL store with row-level locking for refund admission.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

/// Executes SQL statements from a migration file, splitting by semicolons.
async fn execute_migration(pool: &PgPool, sql: &str, name: &str) -> Result<(), anyhow::Error> {
    for statement in sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .map_err(|e| anyhow::anyhow!("Migration {} failed: {}", name, e))?;
        }
    }
    Ok(())
}

/// Runs all database migrations.
async fn run_migrations(pool: &PgPool) -> Result<(), anyhow::Error> {
    execute_migration(
        pool,
        include_str!("../migrations/0001_create_tables_pg.sql"),
        "0001",
    )
    .await?;

    execute_migration(
        pool,
        include_str!("../migrations/0002_create_audit_logs_pg.sql"),
        "0002",
    )
    .await?;

    Ok(())
}

impl PostgresStore {
    /// Creates a new PostgreSQL store with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the database schema (for testing with existing pool).
    pub async fn create_schema(&self) -> Result<(), RepoError> {
        run_migrations(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions and refunds
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), RepoError> {
        let sql = format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"
        );
        sqlx::query(&sql)
            .bind(tx.id.into_uuid())
            .bind(tx.partner_id.into_uuid())
            .bind(tx.amount.amount())
            .bind(tx.amount.currency().code())
            .bind(&tx.idempotency_key)
            .bind(tx.status.as_str())
            .bind(tx.payment_method.as_str())
            .bind(tx.provider.as_str())
            .bind(&tx.provider_transaction_id)
            .bind(&tx.description)
            .bind(tx.refunded_amount)
            .bind(i64::from(tx.retry_count))
            .bind(&tx.error_code)
            .bind(&tx.error_message)
            .bind(tx.created_at)
            .bind(tx.updated_at)
            .bind(tx.completed_at)
            .bind(tx.failed_at)
            .bind(tx.deleted_at)
            .bind(tx.version)
            .execute(&self.pool)
            .await
            .map_err(insert_err)?;
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, RepoError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 AND deleted_at IS NULL"
        );
        let row: Option<TransactionRecord> = sqlx::query_as(&sql)
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(TransactionRecord::into_domain).transpose()
    }

    async fn get_transaction_by_idempotency_key(
        &self,
        partner_id: PartnerId,
        key: &str,
    ) -> Result<Option<Transaction>, RepoError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE partner_id = $1 AND idempotency_key = $2 AND deleted_at IS NULL"
        );
        let row: Option<TransactionRecord> = sqlx::query_as(&sql)
            .bind(partner_id.into_uuid())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(TransactionRecord::into_domain).transpose()
    }

    async fn list_transactions(
        &self,
        partner_id: PartnerId,
        query: &ListTransactionsQuery,
    ) -> Result<Vec<Transaction>, RepoError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE partner_id = $1 AND deleted_at IS NULL \
             AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        );
        let rows: Vec<TransactionRecord> = sqlx::query_as(&sql)
            .bind(partner_id.into_uuid())
            .bind(query.status.map(|s| s.as_str()))
            .bind(i64::from(query.limit()))
            .bind(i64::from(query.offset()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(TransactionRecord::into_domain).collect()
    }

    async fn update_transaction(&self, tx: &mut Transaction) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"UPDATE transactions
               SET status = $1, provider_transaction_id = $2, refunded_amount = $3,
                   retry_count = $4, error_code = $5, error_message = $6, updated_at = $7,
                   completed_at = $8, failed_at = $9, deleted_at = $10, version = version + 1
               WHERE id = $11 AND version = $12"#,
        )
        .bind(tx.status.as_str())
        .bind(&tx.provider_transaction_id)
        .bind(tx.refunded_amount)
        .bind(i64::from(tx.retry_count))
        .bind(&tx.error_code)
        .bind(&tx.error_message)
        .bind(tx.updated_at)
        .bind(tx.completed_at)
        .bind(tx.failed_at)
        .bind(tx.deleted_at)
        .bind(tx.id.into_uuid())
        .bind(tx.version)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let exists: Option<(i32,)> = sqlx::query_as(r#"SELECT 1 FROM transactions WHERE id = $1"#)
                .bind(tx.id.into_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            if exists.is_none() {
                return Err(RepoError::NotFound);
            }
            return Err(RepoError::Conflict(format!(
                "transaction {} was modified concurrently",
                tx.id
            )));
        }

        tx.version += 1;
        Ok(())
    }

    async fn reserve_refund(&self, refund: &Refund, limit: i64) -> Result<(), RepoError> {
        let mut db_tx = self.pool.begin().await.map_err(tx_err)?;

        // Lock the parent so concurrent admissions serialize.
        let parent: Option<(Uuid,)> =
            sqlx::query_as(r#"SELECT id FROM transactions WHERE id = $1 FOR UPDATE"#)
                .bind(refund.transaction_id.into_uuid())
                .fetch_optional(&mut *db_tx)
                .await
                .map_err(db_err)?;
        if parent.is_none() {
            return Err(RepoError::NotFound);
        }

        let reserved: DbSum = sqlx::query_as(
            r#"SELECT COALESCE(SUM(amount), 0)::BIGINT AS total FROM refunds
               WHERE transaction_id = $1 AND deleted_at IS NULL
               AND status IN ('pending', 'processing', 'completed')"#,
        )
        .bind(refund.transaction_id.into_uuid())
        .fetch_one(&mut *db_tx)
        .await
        .map_err(db_err)?;

        if reserved.total + refund.amount.amount() > limit {
            return Err(RepoError::RefundLimitExceeded {
                requested: refund.amount.amount(),
                available: (limit - reserved.total).max(0),
            });
        }

        let sql = format!(
            "INSERT INTO refunds ({REFUND_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&sql)
            .bind(refund.id.into_uuid())
            .bind(refund.transaction_id.into_uuid())
            .bind(refund.amount.amount())
            .bind(refund.amount.currency().code())
            .bind(refund.status.as_str())
            .bind(&refund.reason)
            .bind(&refund.provider_refund_id)
            .bind(&refund.error_code)
            .bind(&refund.error_message)
            .bind(refund.created_at)
            .bind(refund.updated_at)
            .bind(refund.processed_at)
            .bind(refund.deleted_at)
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;

        db_tx.commit().await.map_err(tx_err)?;
        Ok(())
    }

    async fn update_refund(&self, refund: &Refund) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"UPDATE refunds
               SET status = $1, provider_refund_id = $2, error_code = $3, error_message = $4,
                   updated_at = $5, processed_at = $6, deleted_at = $7
               WHERE id = $8"#,
        )
        .bind(refund.status.as_str())
        .bind(&refund.provider_refund_id)
        .bind(&refund.error_code)
        .bind(&refund.error_message)
        .bind(refund.updated_at)
        .bind(refund.processed_at)
        .bind(refund.deleted_at)
        .bind(refund.id.into_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn get_refund(&self, id: RefundId) -> Result<Option<Refund>, RepoError> {
        let sql =
            format!("SELECT {REFUND_COLUMNS} FROM refunds WHERE id = $1 AND deleted_at IS NULL");
        let row: Option<RefundRecord> = sqlx::query_as(&sql)
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(RefundRecord::into_domain).transpose()
    }

    async fn list_refunds(&self, transaction_id: TransactionId) -> Result<Vec<Refund>, RepoError> {
        let sql = format!(
            "SELECT {REFUND_COLUMNS} FROM refunds \
             WHERE transaction_id = $1 AND deleted_at IS NULL ORDER BY created_at ASC"
        );
        let rows: Vec<RefundRecord> = sqlx::query_as(&sql)
            .bind(transaction_id.into_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(RefundRecord::into_domain).collect()
    }

    async fn sum_completed_refunds(&self, transaction_id: TransactionId) -> Result<i64, RepoError> {
        let row: DbSum = sqlx::query_as(
            r#"SELECT COALESCE(SUM(amount), 0)::BIGINT AS total FROM refunds
               WHERE transaction_id = $1 AND deleted_at IS NULL AND status = 'completed'"#,
        )
        .bind(transaction_id.into_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.total)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Partners
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PartnerRepository for PostgresStore {
    async fn create_partner(&self, input: NewPartner) -> Result<(Partner, String), RepoError> {
        let (partner, raw_key) = build_partner(input)?;

        let sql = format!(
            "INSERT INTO partners ({PARTNER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        );
        sqlx::query(&sql)
            .bind(partner.id.into_uuid())
            .bind(&partner.name)
            .bind(&partner.email)
            .bind(&partner.api_key_hash)
            .bind(&partner.api_key_prefix)
            .bind(partner.is_active)
            .bind(i64::from(partner.rate_limit_per_minute))
            .bind(&partner.webhook_url)
            .bind(&partner.webhook_secret)
            .bind(partner.created_at)
            .bind(partner.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok((partner, raw_key))
    }

    async fn get_partner(&self, id: PartnerId) -> Result<Option<Partner>, RepoError> {
        let sql = format!("SELECT {PARTNER_COLUMNS} FROM partners WHERE id = $1");
        let row: Option<PartnerRecord> = sqlx::query_as(&sql)
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(PartnerRecord::into_domain).transpose()
    }

    async fn find_partner_by_api_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<Partner>, RepoError> {
        let sql = format!("SELECT {PARTNER_COLUMNS} FROM partners WHERE api_key_hash = $1");
        let row: Option<PartnerRecord> = sqlx::query_as(&sql)
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(PartnerRecord::into_domain).transpose()
    }

    async fn set_partner_active(&self, id: PartnerId, active: bool) -> Result<bool, RepoError> {
        let result =
            sqlx::query(r#"UPDATE partners SET is_active = $1, updated_at = $2 WHERE id = $3"#)
                .bind(active)
                .bind(Utc::now())
                .bind(id.into_uuid())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit log
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl AuditLogger for PostgresStore {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        sqlx::query(
            r#"INSERT INTO audit_logs (id, partner_id, action, resource_type, resource_id, changes, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.partner_id.into_uuid())
        .bind(&entry.action)
        .bind(entry.resource_type.as_str())
        .bind(entry.resource_id)
        .bind(&entry.changes)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError(e.to_string()))?;
        Ok(())
    }
}
