//! PaymentService unit tests.

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use partnerpay_repo::MemoryStore;
    use partnerpay_types::{
        AppError, AuditEntry, AuditError, AuditLogger, CreateTransactionRequest, GatewayError,
        ListTransactionsQuery, NewPartner, Partner, PartnerId, PartnerRepository, PaymentGateway,
        Refund, RefundId, RefundRequest, RefundStatus, RepoError, Transaction, TransactionId,
        TransactionStatus, TransactionStore,
    };

    use crate::outbound::{NotificationQueue, ProviderRouter};
    use crate::refund::{REFUND_ABORTED, REFUND_FAILED};
    use crate::service::PAYMENT_FAILED;
    use crate::{PaymentService, Reservation};

    /// Gateway whose outcomes are set per test.
    #[derive(Default)]
    pub struct ScriptedGateway {
        fail_payments: AtomicBool,
        fail_refunds: AtomicBool,
        refund_delay: Duration,
    }

    impl ScriptedGateway {
        fn failing_payments() -> Self {
            Self {
                fail_payments: AtomicBool::new(true),
                ..Default::default()
            }
        }

        fn failing_refunds() -> Self {
            Self {
                fail_refunds: AtomicBool::new(true),
                ..Default::default()
            }
        }

        fn slow_refunds(delay: Duration) -> Self {
            Self {
                refund_delay: delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        async fn process_payment(&self, tx: &Transaction) -> Result<String, GatewayError> {
            if self.fail_payments.load(Ordering::SeqCst) {
                return Err(GatewayError::new("card_declined", "insufficient funds"));
            }
            Ok(format!("ch_{}", tx.id))
        }

        async fn process_refund(
            &self,
            refund: &Refund,
            _tx: &Transaction,
        ) -> Result<String, GatewayError> {
            if !self.refund_delay.is_zero() {
                tokio::time::sleep(self.refund_delay).await;
            }
            if self.fail_refunds.load(Ordering::SeqCst) {
                return Err(GatewayError::new("refund_declined", "charge is disputed"));
            }
            Ok(format!("re_{}", refund.id))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Audit sink that always fails.
    struct BrokenAuditLogger;

    #[async_trait]
    impl AuditLogger for BrokenAuditLogger {
        async fn record(&self, _entry: AuditEntry) -> Result<(), AuditError> {
            Err(AuditError("audit store offline".into()))
        }
    }

    /// Memory store that can be told to reject the transaction update that
    /// follows a completed refund, or the Nth refund update (1-based).
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_refund_settlement: AtomicBool,
        fail_refund_update_at: AtomicUsize,
        refund_updates: AtomicUsize,
    }

    #[async_trait]
    impl TransactionStore for FlakyStore {
        async fn insert_transaction(&self, tx: &Transaction) -> Result<(), RepoError> {
            self.inner.insert_transaction(tx).await
        }

        async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, RepoError> {
            self.inner.get_transaction(id).await
        }

        async fn get_transaction_by_idempotency_key(
            &self,
            partner_id: PartnerId,
            key: &str,
        ) -> Result<Option<Transaction>, RepoError> {
            self.inner
                .get_transaction_by_idempotency_key(partner_id, key)
                .await
        }

        async fn list_transactions(
            &self,
            partner_id: PartnerId,
            query: &ListTransactionsQuery,
        ) -> Result<Vec<Transaction>, RepoError> {
            self.inner.list_transactions(partner_id, query).await
        }

        async fn update_transaction(&self, tx: &mut Transaction) -> Result<(), RepoError> {
            let settling = matches!(
                tx.status,
                TransactionStatus::PartiallyRefunded | TransactionStatus::Refunded
            );
            if settling && self.fail_refund_settlement.load(Ordering::SeqCst) {
                return Err(RepoError::Database("connection reset".into()));
            }
            self.inner.update_transaction(tx).await
        }

        async fn reserve_refund(&self, refund: &Refund, limit: i64) -> Result<(), RepoError> {
            self.inner.reserve_refund(refund, limit).await
        }

        async fn update_refund(&self, refund: &Refund) -> Result<(), RepoError> {
            let n = self.refund_updates.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_refund_update_at.load(Ordering::SeqCst) {
                return Err(RepoError::Database("connection reset".into()));
            }
            self.inner.update_refund(refund).await
        }

        async fn get_refund(&self, id: RefundId) -> Result<Option<Refund>, RepoError> {
            self.inner.get_refund(id).await
        }

        async fn list_refunds(&self, transaction_id: TransactionId) -> Result<Vec<Refund>, RepoError> {
            self.inner.list_refunds(transaction_id).await
        }

        async fn sum_completed_refunds(&self, transaction_id: TransactionId) -> Result<i64, RepoError> {
            self.inner.sum_completed_refunds(transaction_id).await
        }
    }

    #[async_trait]
    impl PartnerRepository for FlakyStore {
        async fn create_partner(&self, partner: NewPartner) -> Result<(Partner, String), RepoError> {
            self.inner.create_partner(partner).await
        }

        async fn get_partner(&self, id: PartnerId) -> Result<Option<Partner>, RepoError> {
            self.inner.get_partner(id).await
        }

        async fn find_partner_by_api_key_hash(
            &self,
            hash: &str,
        ) -> Result<Option<Partner>, RepoError> {
            self.inner.find_partner_by_api_key_hash(hash).await
        }

        async fn set_partner_active(&self, id: PartnerId, active: bool) -> Result<bool, RepoError> {
            self.inner.set_partner_active(id, active).await
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn new_partner() -> NewPartner {
        NewPartner {
            name: "Acme".into(),
            email: "ops@acme.test".into(),
            webhook_url: None,
            rate_limit_per_minute: 100,
        }
    }

    async fn setup_with<R>(store: Arc<R>, gateway: Arc<dyn PaymentGateway>) -> (PaymentService<R>, PartnerId)
    where
        R: TransactionStore + PartnerRepository + AuditLogger,
    {
        let (partner, _) = store.create_partner(new_partner()).await.unwrap();
        let service = PaymentService::new(store.clone(), gateway, store, None);
        (service, partner.id)
    }

    async fn setup(gateway: Arc<dyn PaymentGateway>) -> (PaymentService<MemoryStore>, PartnerId) {
        setup_with(Arc::new(MemoryStore::new()), gateway).await
    }

    fn create_request(key: &str, amount: i64) -> CreateTransactionRequest {
        CreateTransactionRequest {
            amount,
            currency: "USD".into(),
            payment_method: "card".into(),
            provider: "stripe".into(),
            idempotency_key: Some(key.into()),
            description: Some("order".into()),
        }
    }

    fn refund_request(amount: i64) -> RefundRequest {
        RefundRequest {
            amount,
            currency: "USD".into(),
            reason: "customer request".into(),
        }
    }

    async fn completed_transaction<R: TransactionStore + PartnerRepository>(
        service: &PaymentService<R>,
        partner: PartnerId,
        amount: i64,
    ) -> Transaction {
        let created = service
            .create_transaction(partner, create_request("order-1", amount))
            .await
            .unwrap();
        service
            .process_transaction(partner, created.transaction().id)
            .await
            .unwrap()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Creation & authentication
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_is_idempotent_per_key() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;

        let first = service
            .create_transaction(partner, create_request("order-1", 10_000))
            .await
            .unwrap();
        let second = service
            .create_transaction(partner, create_request("order-1", 10_000))
            .await
            .unwrap();

        assert!(first.is_created());
        assert!(matches!(second, Reservation::Existing(_)));
        assert_eq!(first.transaction().id, second.transaction().id);
        assert_eq!(first.transaction().status, TransactionStatus::Pending);
        assert_eq!(service.store().transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_create_requires_idempotency_key() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;

        let mut req = create_request("unused", 100);
        req.idempotency_key = None;

        let result = service.create_transaction(partner, req).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_money() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;

        let result = service
            .create_transaction(partner, create_request("zero", 0))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let mut req = create_request("xxx", 100);
        req.currency = "XXX".into();
        let result = service.create_transaction(partner, req).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(service.store().transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_unknown_and_inactive_keys() {
        let store = Arc::new(MemoryStore::new());
        let (partner, api_key) = store.create_partner(new_partner()).await.unwrap();
        let service = PaymentService::new(
            store.clone(),
            Arc::new(ProviderRouter::with_mock_gateways()),
            store.clone(),
            None,
        );

        assert_eq!(service.authenticate(&api_key).await.unwrap().id, partner.id);
        assert!(matches!(
            service.authenticate("pp_not_a_real_key").await,
            Err(AppError::Unauthorized(_))
        ));

        store.set_partner_active(partner.id, false).await.unwrap();
        assert!(matches!(
            service.authenticate(&api_key).await,
            Err(AppError::PartnerInactive)
        ));
    }

    #[tokio::test]
    async fn test_other_partner_cannot_read_or_refund() {
        let (service, owner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let tx = completed_transaction(&service, owner, 10_000).await;
        let intruder = PartnerId::new();

        assert!(matches!(
            service.get_transaction(intruder, tx.id).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            service.request_refund(intruder, tx.id, &refund_request(100)).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            service.get_transaction(owner, TransactionId::new()).await,
            Err(AppError::NotFound(_))
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Processing, retry, cancel
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_process_completes_with_provider_id() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let tx = completed_transaction(&service, partner, 10_000).await;

        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(tx.completed_at.is_some());
        assert!(
            tx.provider_transaction_id
                .as_deref()
                .is_some_and(|id| id.starts_with("mock_stripe_"))
        );

        let again = service.process_transaction(partner, tx.id).await;
        assert!(matches!(again, Err(AppError::InvalidStateTransition(_))));
    }

    #[tokio::test]
    async fn test_payment_failure_records_error() {
        let (service, partner) = setup(Arc::new(ScriptedGateway::failing_payments())).await;
        let created = service
            .create_transaction(partner, create_request("order-1", 5_000))
            .await
            .unwrap();

        let result = service
            .process_transaction(partner, created.transaction().id)
            .await;
        assert!(matches!(result, Err(AppError::Dependency(_))));

        let stored = service
            .get_transaction(partner, created.transaction().id)
            .await
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.error_code.as_deref(), Some(PAYMENT_FAILED));
        assert!(stored.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_fourth_retry_exceeds_limit() {
        let (service, partner) = setup(Arc::new(ScriptedGateway::failing_payments())).await;
        let id = service
            .create_transaction(partner, create_request("order-1", 5_000))
            .await
            .unwrap()
            .transaction()
            .id;
        let _ = service.process_transaction(partner, id).await;

        for attempt in 1..=3 {
            let result = service.retry_transaction(partner, id).await;
            assert!(
                matches!(result, Err(AppError::Dependency(_))),
                "retry {attempt} should reach the gateway"
            );
        }

        let result = service.retry_transaction(partner, id).await;
        assert!(matches!(result, Err(AppError::MaxRetriesExceeded { max: 3 })));

        let stored = service.get_transaction(partner, id).await.unwrap();
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_provider_recovers() {
        let gateway = Arc::new(ScriptedGateway::failing_payments());
        let (service, partner) = setup(gateway.clone()).await;
        let id = service
            .create_transaction(partner, create_request("order-1", 5_000))
            .await
            .unwrap()
            .transaction()
            .id;
        let _ = service.process_transaction(partner, id).await;

        gateway.fail_payments.store(false, Ordering::SeqCst);
        let tx = service.retry_transaction(partner, id).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.retry_count, 1);
        assert!(tx.error_code.is_none());
    }

    #[tokio::test]
    async fn test_retry_requires_failed_status() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let created = service
            .create_transaction(partner, create_request("order-1", 5_000))
            .await
            .unwrap();

        let result = service
            .retry_transaction(partner, created.transaction().id)
            .await;
        assert!(matches!(result, Err(AppError::InvalidStateTransition(_))));
    }

    #[tokio::test]
    async fn test_cancel_only_from_pending() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let created = service
            .create_transaction(partner, create_request("order-1", 5_000))
            .await
            .unwrap();
        let id = created.transaction().id;

        let cancelled = service.cancel_transaction(partner, id).await.unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Cancelled);

        let result = service.process_transaction(partner, id).await;
        assert!(matches!(result, Err(AppError::InvalidStateTransition(_))));

        let completed = service
            .create_transaction(partner, create_request("order-2", 5_000))
            .await
            .unwrap();
        service
            .process_transaction(partner, completed.transaction().id)
            .await
            .unwrap();
        let result = service
            .cancel_transaction(partner, completed.transaction().id)
            .await;
        assert!(matches!(result, Err(AppError::InvalidStateTransition(_))));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Refunds
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_partial_then_full_refund() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let tx = completed_transaction(&service, partner, 10_000).await;

        let first = service
            .request_refund(partner, tx.id, &refund_request(3_000))
            .await
            .unwrap();
        assert_eq!(first.status, RefundStatus::Completed);
        assert!(first.provider_refund_id.is_some());

        let after_first = service.get_transaction(partner, tx.id).await.unwrap();
        assert_eq!(after_first.status, TransactionStatus::PartiallyRefunded);
        assert_eq!(after_first.refunded_amount, 3_000);
        assert_eq!(after_first.refundable_balance(), 7_000);

        service
            .request_refund(partner, tx.id, &refund_request(7_000))
            .await
            .unwrap();
        let after_second = service.get_transaction(partner, tx.id).await.unwrap();
        assert_eq!(after_second.status, TransactionStatus::Refunded);
        assert_eq!(after_second.refundable_balance(), 0);

        let result = service
            .request_refund(partner, tx.id, &refund_request(1))
            .await;
        assert!(matches!(
            result,
            Err(AppError::RefundAmountExceeded { available: 0, .. })
        ));

        let refunds = service.list_refunds(partner, tx.id).await.unwrap();
        assert_eq!(refunds.len(), 2);
        assert_eq!(refunds[0].amount.amount(), 3_000);
    }

    #[tokio::test]
    async fn test_refund_over_remaining_balance_is_rejected() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let tx = completed_transaction(&service, partner, 10_000).await;

        service
            .request_refund(partner, tx.id, &refund_request(6_000))
            .await
            .unwrap();
        let result = service
            .request_refund(partner, tx.id, &refund_request(6_000))
            .await;

        assert!(matches!(
            result,
            Err(AppError::RefundAmountExceeded {
                requested: 6_000,
                available: 4_000
            })
        ));
        assert_eq!(
            service.store().sum_completed_refunds(tx.id).await.unwrap(),
            6_000
        );
    }

    #[tokio::test]
    async fn test_refund_larger_than_original_is_rejected() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let tx = completed_transaction(&service, partner, 10_000).await;

        let result = service
            .request_refund(partner, tx.id, &refund_request(10_001))
            .await;
        assert!(matches!(result, Err(AppError::RefundAmountExceeded { .. })));
        assert!(service.list_refunds(partner, tx.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_currency_must_match() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let tx = completed_transaction(&service, partner, 10_000).await;

        let mut req = refund_request(1_000);
        req.currency = "EUR".into();
        let result = service.request_refund(partner, tx.id, &req).await;

        assert!(matches!(result, Err(AppError::CurrencyMismatch { .. })));
        assert!(service.list_refunds(partner, tx.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_requires_completed_transaction() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let created = service
            .create_transaction(partner, create_request("order-1", 10_000))
            .await
            .unwrap();

        let result = service
            .request_refund(partner, created.transaction().id, &refund_request(100))
            .await;
        assert!(matches!(result, Err(AppError::RefundNotAllowed { .. })));
    }

    #[tokio::test]
    async fn test_refund_window_expired() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let mut tx = completed_transaction(&service, partner, 10_000).await;

        tx.completed_at = Some(Utc::now() - chrono::Duration::days(91));
        service.store().update_transaction(&mut tx).await.unwrap();

        let result = service
            .request_refund(partner, tx.id, &refund_request(100))
            .await;
        assert!(matches!(result, Err(AppError::RefundWindowExpired)));
    }

    #[tokio::test]
    async fn test_gateway_refund_failure_leaves_transaction_unchanged() {
        let (service, partner) = setup(Arc::new(ScriptedGateway::failing_refunds())).await;
        let tx = completed_transaction(&service, partner, 10_000).await;

        let result = service
            .request_refund(partner, tx.id, &refund_request(2_500))
            .await;
        assert!(matches!(result, Err(AppError::Dependency(_))));

        let stored = service.get_transaction(partner, tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(stored.refunded_amount, 0);

        let refunds = service.list_refunds(partner, tx.id).await.unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].status, RefundStatus::Failed);
        assert_eq!(refunds[0].error_code.as_deref(), Some(REFUND_FAILED));

        // A failed refund releases its reservation.
        assert_eq!(
            service.store().sum_completed_refunds(tx.id).await.unwrap(),
            0
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refunds_never_exceed_original() {
        let gateway = Arc::new(ScriptedGateway::slow_refunds(Duration::from_millis(50)));
        let (service, partner) = setup(gateway).await;
        let service = Arc::new(service);
        let tx = completed_transaction(&service, partner, 10_000).await;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .request_refund(partner, tx.id, &refund_request(6_000))
                        .await
                })
            })
            .collect();

        let mut succeeded = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::RefundAmountExceeded { .. }) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!((succeeded, rejected), (1, 1));
        assert_eq!(
            service.store().sum_completed_refunds(tx.id).await.unwrap(),
            6_000
        );
        assert_eq!(service.refund_engine().lock_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_small_concurrent_refunds_fill_exactly() {
        let gateway = Arc::new(ScriptedGateway::slow_refunds(Duration::from_millis(5)));
        let (service, partner) = setup(gateway).await;
        let service = Arc::new(service);
        let tx = completed_transaction(&service, partner, 10_000).await;

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .request_refund(partner, tx.id, &refund_request(1_000))
                        .await
                })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        let stored = service.get_transaction(partner, tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Refunded);
        assert_eq!(stored.refunded_amount, 10_000);
    }

    #[tokio::test]
    async fn test_failed_settlement_is_consistency_warning() {
        let store = Arc::new(FlakyStore::default());
        let (partner, _) = store.create_partner(new_partner()).await.unwrap();
        let service = PaymentService::new(
            store.clone(),
            Arc::new(ProviderRouter::with_mock_gateways()),
            Arc::new(BrokenAuditLogger),
            None,
        );
        let tx = completed_transaction(&service, partner.id, 10_000).await;

        store.fail_refund_settlement.store(true, Ordering::SeqCst);
        let result = service
            .request_refund(partner.id, tx.id, &refund_request(4_000))
            .await;

        let Err(AppError::ConsistencyWarning {
            transaction_id,
            refund_id,
            ..
        }) = &result
        else {
            panic!("expected a consistency warning, got {result:?}");
        };
        assert_eq!(*transaction_id, tx.id);

        let refund = store.get_refund(*refund_id).await.unwrap().unwrap();
        assert_eq!(refund.status, RefundStatus::Completed);

        let stored = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(stored.refunded_amount, 0);
    }

    async fn flaky_setup() -> (Arc<FlakyStore>, PaymentService<FlakyStore>, Transaction) {
        let store = Arc::new(FlakyStore::default());
        let (partner, _) = store.create_partner(new_partner()).await.unwrap();
        let service = PaymentService::new(
            store.clone(),
            Arc::new(ProviderRouter::with_mock_gateways()),
            Arc::new(BrokenAuditLogger),
            None,
        );
        let tx = completed_transaction(&service, partner.id, 10_000).await;
        (store, service, tx)
    }

    #[tokio::test]
    async fn test_store_failure_before_gateway_releases_reservation() {
        let (store, service, tx) = flaky_setup().await;
        let partner = tx.partner_id;

        // The write that moves the refund to processing fails.
        store.fail_refund_update_at.store(1, Ordering::SeqCst);
        let result = service
            .request_refund(partner, tx.id, &refund_request(6_000))
            .await;
        assert!(matches!(result, Err(AppError::Dependency(_))));

        let refunds = service.list_refunds(partner, tx.id).await.unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].status, RefundStatus::Failed);
        assert_eq!(refunds[0].error_code.as_deref(), Some(REFUND_ABORTED));

        // The whole balance is still refundable.
        service
            .request_refund(partner, tx.id, &refund_request(10_000))
            .await
            .unwrap();
        let stored = service.get_transaction(partner, tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Refunded);
        assert_eq!(stored.refunded_amount, 10_000);
    }

    #[tokio::test]
    async fn test_unrecorded_provider_refund_is_consistency_warning() {
        let (store, service, tx) = flaky_setup().await;
        let partner = tx.partner_id;

        // Processing write succeeds, the provider pays out, the completion write fails.
        store.fail_refund_update_at.store(2, Ordering::SeqCst);
        let result = service
            .request_refund(partner, tx.id, &refund_request(6_000))
            .await;

        let Err(AppError::ConsistencyWarning { refund_id, .. }) = &result else {
            panic!("expected a consistency warning, got {result:?}");
        };
        let refund = store.get_refund(*refund_id).await.unwrap().unwrap();
        assert_eq!(refund.status, RefundStatus::Processing);

        // Money left through the provider, so the reservation keeps holding it.
        let result = service
            .request_refund(partner, tx.id, &refund_request(6_000))
            .await;
        assert!(matches!(
            result,
            Err(AppError::RefundAmountExceeded {
                available: 4_000,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_strand_refund() {
        let gateway = Arc::new(ScriptedGateway::slow_refunds(Duration::from_millis(100)));
        let (service, partner) = setup(gateway).await;
        let tx = completed_transaction(&service, partner, 10_000).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            service.request_refund(partner, tx.id, &refund_request(4_000)),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;

        let refunds = service.list_refunds(partner, tx.id).await.unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].status, RefundStatus::Completed);

        let stored = service.get_transaction(partner, tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::PartiallyRefunded);
        assert_eq!(stored.refunded_amount, 4_000);
        assert_eq!(service.refund_engine().lock_count(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Side effects
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_failing_audit_does_not_fail_operations() {
        let store = Arc::new(MemoryStore::new());
        let (partner, _) = store.create_partner(new_partner()).await.unwrap();
        let service = PaymentService::new(
            store,
            Arc::new(ProviderRouter::with_mock_gateways()),
            Arc::new(BrokenAuditLogger),
            None,
        );

        let tx = completed_transaction(&service, partner.id, 10_000).await;
        service
            .request_refund(partner.id, tx.id, &refund_request(10_000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_state_changes_are_audited() {
        let (service, partner) = setup(Arc::new(ProviderRouter::with_mock_gateways())).await;
        let tx = completed_transaction(&service, partner, 10_000).await;
        service
            .request_refund(partner, tx.id, &refund_request(2_000))
            .await
            .unwrap();

        let actions: Vec<String> = service
            .store()
            .audit_entries()
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(
            actions,
            ["transaction_created", "payment_completed", "refund_completed"]
        );
    }

    #[tokio::test]
    async fn test_notifications_follow_committed_changes() {
        let store = Arc::new(MemoryStore::new());
        let (partner, _) = store.create_partner(new_partner()).await.unwrap();
        let (queue, mut rx) = NotificationQueue::bounded(8);
        let service = PaymentService::new(
            store.clone(),
            Arc::new(ProviderRouter::with_mock_gateways()),
            store,
            Some(queue),
        );

        let tx = completed_transaction(&service, partner.id, 10_000).await;
        service
            .request_refund(partner.id, tx.id, &refund_request(500))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.event.to_string(), "payment.completed");
        assert_eq!(second.event.to_string(), "refund.completed");
        assert_eq!(second.partner_id, partner.id);
    }
}
