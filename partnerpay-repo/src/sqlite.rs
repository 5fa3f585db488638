//! SQLite store adapter.
#![allow(clippy::collapsible_if)]

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use uuid::Uuid;

use partnerpay_types::{
    AuditEntry, AuditError, AuditLogger, ListTransactionsQuery, NewPartner, Partner, PartnerId,
    PartnerRepository, Refund, RefundId, RepoError, Transaction, TransactionId, TransactionStore,
};

use crate::build_partner;
use crate::types::sqlite_rows::{PartnerRow, RefundRow, TransactionRow, opt_ts, ts};
use crate::types::{DbSum, PartnerRecord, RefundRecord, TransactionRecord, db_err, insert_err};

const TRANSACTION_COLUMNS: &str = "id, partner_id, amount, currency, idempotency_key, status, \
     payment_method, provider, provider_transaction_id, description, refunded_amount, \
     retry_count, error_code, error_message, created_at, updated_at, completed_at, failed_at, \
     deleted_at, version";

const REFUND_COLUMNS: &str = "id, transaction_id, amount, currency, status, reason, \
     provider_refund_id, error_code, error_message, created_at, updated_at, processed_at, \
     deleted_at";

const PARTNER_COLUMNS: &str = "id, name, email, api_key_hash, api_key_prefix, is_active, \
     rate_limit_per_minute, webhook_url, webhook_secret, created_at, updated_at";

fn into_transaction(row: TransactionRow) -> Result<Transaction, RepoError> {
    TransactionRecord::try_from(row)?.into_domain()
}

fn into_refund(row: RefundRow) -> Result<Refund, RepoError> {
    RefundRecord::try_from(row)?.into_domain()
}

fn into_partner(row: PartnerRow) -> Result<Partner, RepoError> {
    PartnerRecord::try_from(row)?.into_domain()
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Store
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite store implementation.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Creates a new SQLite store with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure on-disk SQLite target directory exists (no-op for in-memory).
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` opens its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the database schema. Safe to run more than once.
    pub async fn create_schema(&self) -> Result<(), RepoError> {
        sqlx::raw_sql(include_str!("../migrations/0001_create_tables.sql"))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::raw_sql(include_str!("../migrations/0002_create_audit_logs.sql"))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn transaction_exists(&self, id: TransactionId) -> Result<bool, RepoError> {
        let row: Option<(i64,)> = sqlx::query_as(r#"SELECT 1 FROM transactions WHERE id = ?"#)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn sum_refunds(
        &self,
        transaction_id: TransactionId,
        statuses: &str,
    ) -> Result<i64, RepoError> {
        let sql = format!(
            "SELECT COALESCE(SUM(amount), 0) AS total FROM refunds \
             WHERE transaction_id = ? AND deleted_at IS NULL AND status IN ({statuses})"
        );
        let row: DbSum = sqlx::query_as(&sql)
            .bind(transaction_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.total)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions and refunds
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), RepoError> {
        let sql = format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(tx.id.to_string())
            .bind(tx.partner_id.to_string())
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
            .bind(ts(tx.created_at))
            .bind(ts(tx.updated_at))
            .bind(opt_ts(tx.completed_at))
            .bind(opt_ts(tx.failed_at))
            .bind(opt_ts(tx.deleted_at))
            .bind(tx.version)
            .execute(&self.pool)
            .await
            .map_err(insert_err)?;
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, RepoError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ? AND deleted_at IS NULL"
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(into_transaction).transpose()
    }

    async fn get_transaction_by_idempotency_key(
        &self,
        partner_id: PartnerId,
        key: &str,
    ) -> Result<Option<Transaction>, RepoError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE partner_id = ? AND idempotency_key = ? AND deleted_at IS NULL"
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(partner_id.to_string())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(into_transaction).transpose()
    }

    async fn list_transactions(
        &self,
        partner_id: PartnerId,
        query: &ListTransactionsQuery,
    ) -> Result<Vec<Transaction>, RepoError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE partner_id = ? AND deleted_at IS NULL AND (? IS NULL OR status = ?) \
             ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let status = query.status.map(|s| s.as_str());
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(partner_id.to_string())
            .bind(status)
            .bind(status)
            .bind(i64::from(query.limit()))
            .bind(i64::from(query.offset()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(into_transaction).collect()
    }

    async fn update_transaction(&self, tx: &mut Transaction) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"UPDATE transactions
               SET status = ?, provider_transaction_id = ?, refunded_amount = ?, retry_count = ?,
                   error_code = ?, error_message = ?, updated_at = ?, completed_at = ?,
                   failed_at = ?, deleted_at = ?, version = version + 1
               WHERE id = ? AND version = ?"#,
        )
        .bind(tx.status.as_str())
        .bind(&tx.provider_transaction_id)
        .bind(tx.refunded_amount)
        .bind(i64::from(tx.retry_count))
        .bind(&tx.error_code)
        .bind(&tx.error_message)
        .bind(ts(tx.updated_at))
        .bind(opt_ts(tx.completed_at))
        .bind(opt_ts(tx.failed_at))
        .bind(opt_ts(tx.deleted_at))
        .bind(tx.id.to_string())
        .bind(tx.version)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            if !self.transaction_exists(tx.id).await? {
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
        if !self.transaction_exists(refund.transaction_id).await? {
            return Err(RepoError::NotFound);
        }

        // Check and insert in one statement; SQLite serializes writers.
        let sql = format!(
            "INSERT INTO refunds ({REFUND_COLUMNS}) \
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ? \
             WHERE (SELECT COALESCE(SUM(amount), 0) FROM refunds \
                    WHERE transaction_id = ? AND deleted_at IS NULL \
                    AND status IN ('pending', 'processing', 'completed')) + ? <= ?"
        );
        let result = sqlx::query(&sql)
            .bind(refund.id.to_string())
            .bind(refund.transaction_id.to_string())
            .bind(refund.amount.amount())
            .bind(refund.amount.currency().code())
            .bind(refund.status.as_str())
            .bind(&refund.reason)
            .bind(&refund.provider_refund_id)
            .bind(&refund.error_code)
            .bind(&refund.error_message)
            .bind(ts(refund.created_at))
            .bind(ts(refund.updated_at))
            .bind(opt_ts(refund.processed_at))
            .bind(opt_ts(refund.deleted_at))
            .bind(refund.transaction_id.to_string())
            .bind(refund.amount.amount())
            .bind(limit)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let reserved = self
                .sum_refunds(
                    refund.transaction_id,
                    "'pending', 'processing', 'completed'",
                )
                .await?;
            return Err(RepoError::RefundLimitExceeded {
                requested: refund.amount.amount(),
                available: (limit - reserved).max(0),
            });
        }
        Ok(())
    }

    async fn update_refund(&self, refund: &Refund) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"UPDATE refunds
               SET status = ?, provider_refund_id = ?, error_code = ?, error_message = ?,
                   updated_at = ?, processed_at = ?, deleted_at = ?
               WHERE id = ?"#,
        )
        .bind(refund.status.as_str())
        .bind(&refund.provider_refund_id)
        .bind(&refund.error_code)
        .bind(&refund.error_message)
        .bind(ts(refund.updated_at))
        .bind(opt_ts(refund.processed_at))
        .bind(opt_ts(refund.deleted_at))
        .bind(refund.id.to_string())
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
            format!("SELECT {REFUND_COLUMNS} FROM refunds WHERE id = ? AND deleted_at IS NULL");
        let row: Option<RefundRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(into_refund).transpose()
    }

    async fn list_refunds(&self, transaction_id: TransactionId) -> Result<Vec<Refund>, RepoError> {
        let sql = format!(
            "SELECT {REFUND_COLUMNS} FROM refunds \
             WHERE transaction_id = ? AND deleted_at IS NULL ORDER BY created_at ASC"
        );
        let rows: Vec<RefundRow> = sqlx::query_as(&sql)
            .bind(transaction_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(into_refund).collect()
    }

    async fn sum_completed_refunds(&self, transaction_id: TransactionId) -> Result<i64, RepoError> {
        self.sum_refunds(transaction_id, "'completed'").await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Partners
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PartnerRepository for SqliteStore {
    async fn create_partner(&self, input: NewPartner) -> Result<(Partner, String), RepoError> {
        let (partner, raw_key) = build_partner(input)?;

        let sql = format!(
            "INSERT INTO partners ({PARTNER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(partner.id.to_string())
            .bind(&partner.name)
            .bind(&partner.email)
            .bind(&partner.api_key_hash)
            .bind(&partner.api_key_prefix)
            .bind(partner.is_active)
            .bind(i64::from(partner.rate_limit_per_minute))
            .bind(&partner.webhook_url)
            .bind(&partner.webhook_secret)
            .bind(ts(partner.created_at))
            .bind(ts(partner.updated_at))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok((partner, raw_key))
    }

    async fn get_partner(&self, id: PartnerId) -> Result<Option<Partner>, RepoError> {
        let sql = format!("SELECT {PARTNER_COLUMNS} FROM partners WHERE id = ?");
        let row: Option<PartnerRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(into_partner).transpose()
    }

    async fn find_partner_by_api_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<Partner>, RepoError> {
        let sql = format!("SELECT {PARTNER_COLUMNS} FROM partners WHERE api_key_hash = ?");
        let row: Option<PartnerRow> = sqlx::query_as(&sql)
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(into_partner).transpose()
    }

    async fn set_partner_active(&self, id: PartnerId, active: bool) -> Result<bool, RepoError> {
        let result = sqlx::query(r#"UPDATE partners SET is_active = ?, updated_at = ? WHERE id = ?"#)
            .bind(active)
            .bind(ts(chrono::Utc::now()))
            .bind(id.to_string())
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
impl AuditLogger for SqliteStore {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        sqlx::query(
            r#"INSERT INTO audit_logs (id, partner_id, action, resource_type, resource_id, changes, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(entry.partner_id.to_string())
        .bind(&entry.action)
        .bind(entry.resource_type.as_str())
        .bind(entry.resource_id.to_string())
        .bind(entry.changes.to_string())
        .bind(ts(entry.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError(e.to_string()))?;
        Ok(())
    }
}
