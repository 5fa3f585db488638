//! SQLite store integration tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use partnerpay_types::{
        AuditEntry, AuditLogger, Currency, ListTransactionsQuery, Money, NewPartner,
        NewTransaction, PartnerId, PartnerRepository, PaymentMethod, PaymentProvider, Refund,
        RefundStatus, RepoError, ResourceType, Transaction, TransactionStatus, TransactionStore,
    };

    use crate::SqliteStore;
    use crate::security::hash_api_key;

    async fn setup_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn new_tx(partner_id: PartnerId, key: &str, amount: i64) -> Transaction {
        Transaction::new(NewTransaction {
            partner_id,
            amount: Money::new(amount, Currency::USD).unwrap(),
            idempotency_key: key.to_string(),
            payment_method: PaymentMethod::Card,
            provider: PaymentProvider::Stripe,
            description: Some("order #1".into()),
        })
        .unwrap()
    }

    fn refund(tx: &Transaction, amount: i64) -> Refund {
        Refund::new(tx.id, Money::new(amount, Currency::USD).unwrap(), "returned").unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_transaction() {
        let store = setup_store().await;
        let tx = new_tx(PartnerId::new(), "order-1", 10_000);

        store.insert_transaction(&tx).await.unwrap();
        let fetched = store.get_transaction(tx.id).await.unwrap().unwrap();

        assert_eq!(fetched.id, tx.id);
        assert_eq!(fetched.amount, tx.amount);
        assert_eq!(fetched.status, TransactionStatus::Pending);
        assert_eq!(fetched.description.as_deref(), Some("order #1"));
        assert_eq!(fetched.version, 0);
    }

    #[tokio::test]
    async fn test_get_transaction_not_found() {
        let store = setup_store().await;
        let result = store
            .get_transaction(partnerpay_types::TransactionId::new())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key() {
        let store = setup_store().await;
        let partner = PartnerId::new();

        store.insert_transaction(&new_tx(partner, "order-1", 100)).await.unwrap();
        let result = store.insert_transaction(&new_tx(partner, "order-1", 100)).await;
        assert!(matches!(result, Err(RepoError::DuplicateIdempotencyKey)));

        let found = store
            .get_transaction_by_idempotency_key(partner, "order-1")
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_rejects_stale() {
        let store = setup_store().await;
        let tx = new_tx(PartnerId::new(), "order-1", 10_000);
        store.insert_transaction(&tx).await.unwrap();

        let mut current = tx.clone();
        current.mark_as_processing().unwrap();
        store.update_transaction(&mut current).await.unwrap();
        current.mark_as_completed("prov_1").unwrap();
        store.update_transaction(&mut current).await.unwrap();
        assert_eq!(current.version, 2);

        let mut stale = tx.clone();
        stale.cancel().unwrap();
        let result = store.update_transaction(&mut stale).await;
        assert!(matches!(result, Err(RepoError::Conflict(_))));

        let fetched = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TransactionStatus::Completed);
        assert_eq!(fetched.provider_transaction_id.as_deref(), Some("prov_1"));
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_transaction() {
        let store = setup_store().await;
        let mut tx = new_tx(PartnerId::new(), "ghost", 100);
        let result = store.update_transaction(&mut tx).await;
        assert!(matches!(result, Err(RepoError::NotFound)));
    }

    #[tokio::test]
    async fn test_list_transactions_newest_first() {
        let store = setup_store().await;
        let partner = PartnerId::new();
        for i in 0..3 {
            store
                .insert_transaction(&new_tx(partner, &format!("order-{i}"), 100 + i))
                .await
                .unwrap();
        }

        let rows = store
            .list_transactions(partner, &ListTransactionsQuery::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].created_at >= rows[2].created_at);

        let pending = store
            .list_transactions(
                partner,
                &ListTransactionsQuery {
                    status: Some(TransactionStatus::Pending),
                    limit: Some(2),
                    offset: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn test_reserve_refund_enforces_limit() {
        let store = setup_store().await;
        let tx = new_tx(PartnerId::new(), "order-1", 10_000);
        store.insert_transaction(&tx).await.unwrap();

        let mut first = refund(&tx, 3_000);
        store.reserve_refund(&first, 10_000).await.unwrap();
        store.reserve_refund(&refund(&tx, 7_000), 10_000).await.unwrap();

        let result = store.reserve_refund(&refund(&tx, 1), 10_000).await;
        assert!(matches!(
            result,
            Err(RepoError::RefundLimitExceeded { available: 0, .. })
        ));

        first.mark_as_processing().unwrap();
        first.mark_as_completed("re_1").unwrap();
        store.update_refund(&first).await.unwrap();

        assert_eq!(store.sum_completed_refunds(tx.id).await.unwrap(), 3_000);

        let refunds = store.list_refunds(tx.id).await.unwrap();
        assert_eq!(refunds.len(), 2);
        let stored = store.get_refund(first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RefundStatus::Completed);
        assert_eq!(stored.provider_refund_id.as_deref(), Some("re_1"));
    }

    #[tokio::test]
    async fn test_reserve_refund_unknown_transaction() {
        let store = setup_store().await;
        let tx = new_tx(PartnerId::new(), "never-stored", 100);
        let result = store.reserve_refund(&refund(&tx, 50), 100).await;
        assert!(matches!(result, Err(RepoError::NotFound)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_overshoot() {
        let store = Arc::new(setup_store().await);
        let tx = new_tx(PartnerId::new(), "order-1", 10_000);
        store.insert_transaction(&tx).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let r = refund(&tx, 2_500);
            handles.push(tokio::spawn(async move { store.reserve_refund(&r, 10_000).await }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 4);
    }

    #[tokio::test]
    async fn test_partner_roundtrip() {
        let store = setup_store().await;
        let (partner, raw_key) = store
            .create_partner(NewPartner {
                name: "Acme".into(),
                email: "ops@acme.test".into(),
                webhook_url: Some("https://acme.test/hooks".into()),
                rate_limit_per_minute: 30,
            })
            .await
            .unwrap();

        let found = store
            .find_partner_by_api_key_hash(&hash_api_key(&raw_key))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, partner.id);
        assert_eq!(found.rate_limit_per_minute, 30);
        assert_eq!(found.webhook_secret, partner.webhook_secret);
        assert!(found.is_active);

        assert!(store.set_partner_active(partner.id, false).await.unwrap());
        let found = store.get_partner(partner.id).await.unwrap().unwrap();
        assert!(!found.is_active);
    }

    #[tokio::test]
    async fn test_audit_record_persists() {
        let store = setup_store().await;
        let entry = AuditEntry::new(
            PartnerId::new(),
            "transaction_created",
            ResourceType::Transaction,
            uuid::Uuid::new_v4(),
            serde_json::json!({"status": "pending"}),
        );
        store.record(entry).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_logs")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
