//! Row records shared by the SQL adapters.
//!
//! PostgreSQL decodes straight into the `*Record` structs. SQLite stores ids
//! and timestamps as TEXT, so its rows decode into the string-typed structs in
//! [`sqlite_rows`] and convert into records before reaching the domain.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use partnerpay_types::{
    Currency, Money, Partner, PartnerId, PaymentMethod, PaymentProvider, Refund, RefundId,
    RefundStatus, RepoError, Transaction, TransactionId, TransactionStatus,
};

// ─────────────────────────────────────────────────────────────────────────────
// Error helpers
// ─────────────────────────────────────────────────────────────────────────────

pub fn db_err(e: sqlx::Error) -> RepoError {
    RepoError::Database(e.to_string())
}

pub fn tx_err(e: sqlx::Error) -> RepoError {
    RepoError::Transaction(e.to_string())
}

/// Maps a unique-index violation on insert to a duplicate idempotency key.
pub fn insert_err(e: sqlx::Error) -> RepoError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepoError::DuplicateIdempotencyKey
        }
        _ => db_err(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────────────────────────

fn corrupt(what: &str, value: &str) -> RepoError {
    RepoError::Database(format!("Unknown {what} in row: {value}"))
}

pub fn parse_currency(s: &str) -> Result<Currency, RepoError> {
    s.parse().map_err(|_| corrupt("currency", s))
}

pub fn parse_transaction_status(s: &str) -> Result<TransactionStatus, RepoError> {
    s.parse().map_err(|_| corrupt("transaction status", s))
}

pub fn parse_refund_status(s: &str) -> Result<RefundStatus, RepoError> {
    s.parse().map_err(|_| corrupt("refund status", s))
}

pub fn parse_method(s: &str) -> Result<PaymentMethod, RepoError> {
    s.parse().map_err(|_| corrupt("payment method", s))
}

pub fn parse_provider(s: &str) -> Result<PaymentProvider, RepoError> {
    s.parse().map_err(|_| corrupt("provider", s))
}

fn non_negative<T: TryFrom<i64>>(value: i64, column: &str) -> Result<T, RepoError> {
    T::try_from(value).map_err(|_| RepoError::Database(format!("{column} out of range: {value}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Transaction columns with native id and timestamp types.
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct TransactionRecord {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub idempotency_key: String,
    pub status: String,
    pub payment_method: String,
    pub provider: String,
    pub provider_transaction_id: Option<String>,
    pub description: Option<String>,
    pub refunded_amount: i64,
    pub retry_count: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl TransactionRecord {
    pub fn into_domain(self) -> Result<Transaction, RepoError> {
        let currency = parse_currency(&self.currency)?;
        Ok(Transaction {
            id: TransactionId::from_uuid(self.id),
            partner_id: PartnerId::from_uuid(self.partner_id),
            amount: Money::new(self.amount, currency)?,
            idempotency_key: self.idempotency_key,
            status: parse_transaction_status(&self.status)?,
            payment_method: parse_method(&self.payment_method)?,
            provider: parse_provider(&self.provider)?,
            provider_transaction_id: self.provider_transaction_id,
            description: self.description,
            refunded_amount: self.refunded_amount,
            retry_count: non_negative(self.retry_count, "retry_count")?,
            error_code: self.error_code,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            deleted_at: self.deleted_at,
            version: self.version,
        })
    }
}

#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct RefundRecord {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub reason: String,
    pub provider_refund_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RefundRecord {
    pub fn into_domain(self) -> Result<Refund, RepoError> {
        let currency = parse_currency(&self.currency)?;
        Ok(Refund {
            id: RefundId::from_uuid(self.id),
            transaction_id: TransactionId::from_uuid(self.transaction_id),
            amount: Money::new(self.amount, currency)?,
            status: parse_refund_status(&self.status)?,
            reason: self.reason,
            provider_refund_id: self.provider_refund_id,
            error_code: self.error_code,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
            processed_at: self.processed_at,
            deleted_at: self.deleted_at,
        })
    }
}

#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct PartnerRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub api_key_hash: String,
    pub api_key_prefix: String,
    pub is_active: bool,
    pub rate_limit_per_minute: i64,
    pub webhook_url: Option<String>,
    pub webhook_secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PartnerRecord {
    pub fn into_domain(self) -> Result<Partner, RepoError> {
        Ok(Partner {
            id: PartnerId::from_uuid(self.id),
            name: self.name,
            email: self.email,
            api_key_hash: self.api_key_hash,
            api_key_prefix: self.api_key_prefix,
            is_active: self.is_active,
            rate_limit_per_minute: non_negative(
                self.rate_limit_per_minute,
                "rate_limit_per_minute",
            )?,
            webhook_url: self.webhook_url,
            webhook_secret: self.webhook_secret,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Single aggregate column.
#[derive(sqlx::FromRow)]
pub struct DbSum {
    pub total: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite rows
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(feature = "sqlite")]
pub mod sqlite_rows {
    use chrono::{DateTime, SecondsFormat, Utc};
    use sqlx::FromRow;
    use uuid::Uuid;

    use super::{PartnerRecord, RefundRecord, TransactionRecord};
    use partnerpay_types::RepoError;

    /// Fixed-width RFC 3339 so that TEXT ordering matches time ordering.
    pub fn ts(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<String> {
        dt.map(ts)
    }

    fn uuid(s: &str) -> Result<Uuid, RepoError> {
        Uuid::parse_str(s).map_err(|e| RepoError::Database(e.to_string()))
    }

    fn parse_ts(s: &str) -> Result<DateTime<Utc>, RepoError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| RepoError::Database(e.to_string()))
    }

    fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, RepoError> {
        s.as_deref().map(parse_ts).transpose()
    }

    #[derive(FromRow)]
    pub struct TransactionRow {
        pub id: String,
        pub partner_id: String,
        pub amount: i64,
        pub currency: String,
        pub idempotency_key: String,
        pub status: String,
        pub payment_method: String,
        pub provider: String,
        pub provider_transaction_id: Option<String>,
        pub description: Option<String>,
        pub refunded_amount: i64,
        pub retry_count: i64,
        pub error_code: Option<String>,
        pub error_message: Option<String>,
        pub created_at: String,
        pub updated_at: String,
        pub completed_at: Option<String>,
        pub failed_at: Option<String>,
        pub deleted_at: Option<String>,
        pub version: i64,
    }

    impl TryFrom<TransactionRow> for TransactionRecord {
        type Error = RepoError;

        fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
            Ok(Self {
                id: uuid(&row.id)?,
                partner_id: uuid(&row.partner_id)?,
                amount: row.amount,
                currency: row.currency,
                idempotency_key: row.idempotency_key,
                status: row.status,
                payment_method: row.payment_method,
                provider: row.provider,
                provider_transaction_id: row.provider_transaction_id,
                description: row.description,
                refunded_amount: row.refunded_amount,
                retry_count: row.retry_count,
                error_code: row.error_code,
                error_message: row.error_message,
                created_at: parse_ts(&row.created_at)?,
                updated_at: parse_ts(&row.updated_at)?,
                completed_at: parse_opt_ts(row.completed_at)?,
                failed_at: parse_opt_ts(row.failed_at)?,
                deleted_at: parse_opt_ts(row.deleted_at)?,
                version: row.version,
            })
        }
    }

    #[derive(FromRow)]
    pub struct RefundRow {
        pub id: String,
        pub transaction_id: String,
        pub amount: i64,
        pub currency: String,
        pub status: String,
        pub reason: String,
        pub provider_refund_id: Option<String>,
        pub error_code: Option<String>,
        pub error_message: Option<String>,
        pub created_at: String,
        pub updated_at: String,
        pub processed_at: Option<String>,
        pub deleted_at: Option<String>,
    }

    impl TryFrom<RefundRow> for RefundRecord {
        type Error = RepoError;

        fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
            Ok(Self {
                id: uuid(&row.id)?,
                transaction_id: uuid(&row.transaction_id)?,
                amount: row.amount,
                currency: row.currency,
                status: row.status,
                reason: row.reason,
                provider_refund_id: row.provider_refund_id,
                error_code: row.error_code,
                error_message: row.error_message,
                created_at: parse_ts(&row.created_at)?,
                updated_at: parse_ts(&row.updated_at)?,
                processed_at: parse_opt_ts(row.processed_at)?,
                deleted_at: parse_opt_ts(row.deleted_at)?,
            })
        }
    }

    #[derive(FromRow)]
    pub struct PartnerRow {
        pub id: String,
        pub name: String,
        pub email: String,
        pub api_key_hash: String,
        pub api_key_prefix: String,
        pub is_active: i64,
        pub rate_limit_per_minute: i64,
        pub webhook_url: Option<String>,
        pub webhook_secret: String,
        pub created_at: String,
        pub updated_at: String,
    }

    impl TryFrom<PartnerRow> for PartnerRecord {
        type Error = RepoError;

        fn try_from(row: PartnerRow) -> Result<Self, Self::Error> {
            Ok(Self {
                id: uuid(&row.id)?,
                name: row.name,
                email: row.email,
                api_key_hash: row.api_key_hash,
                api_key_prefix: row.api_key_prefix,
                is_active: row.is_active != 0,
                rate_limit_per_minute: row.rate_limit_per_minute,
                webhook_url: row.webhook_url,
                webhook_secret: row.webhook_secret,
                created_at: parse_ts(&row.created_at)?,
                updated_at: parse_ts(&row.updated_at)?,
            })
        }
    }
}
