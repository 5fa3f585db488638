//! Payment gateway adapters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use partnerpay_types::{GatewayError, PaymentGateway, PaymentProvider, Refund, Transaction};

fn short_id(id: impl std::fmt::Display) -> String {
    id.to_string().chars().take(8).collect()
}

/// Gateway that approves every charge and refund without network calls.
#[derive(Debug, Clone)]
pub struct MockPaymentGateway {
    provider: PaymentProvider,
}

impl MockPaymentGateway {
    pub fn new(provider: PaymentProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    #[tracing::instrument(skip(self, tx), fields(provider = %self.provider, transaction_id = %tx.id))]
    async fn process_payment(&self, tx: &Transaction) -> Result<String, GatewayError> {
        tracing::debug!(amount = tx.amount.amount(), "mock gateway charging");
        Ok(format!("mock_{}_{}", self.provider, short_id(tx.id)))
    }

    #[tracing::instrument(skip(self, refund, _tx), fields(provider = %self.provider, refund_id = %refund.id))]
    async fn process_refund(
        &self,
        refund: &Refund,
        _tx: &Transaction,
    ) -> Result<String, GatewayError> {
        tracing::debug!(amount = refund.amount.amount(), "mock gateway refunding");
        Ok(format!("mock_refund_{}_{}", self.provider, short_id(refund.id)))
    }

    fn name(&self) -> &str {
        self.provider.as_str()
    }
}

/// Routes each call to the gateway registered for the transaction's provider.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with a [`MockPaymentGateway`] for every provider.
    pub fn with_mock_gateways() -> Self {
        PaymentProvider::ALL
            .into_iter()
            .fold(Self::new(), |router, provider| {
                router.register(provider, Arc::new(MockPaymentGateway::new(provider)))
            })
    }

    pub fn register(mut self, provider: PaymentProvider, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(provider, gateway);
        self
    }

    fn gateway_for(&self, provider: PaymentProvider) -> Result<&Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways.get(&provider).ok_or_else(|| {
            GatewayError::new(
                "PROVIDER_UNAVAILABLE",
                format!("no gateway configured for provider {provider}"),
            )
        })
    }
}

#[async_trait]
impl PaymentGateway for ProviderRouter {
    async fn process_payment(&self, tx: &Transaction) -> Result<String, GatewayError> {
        self.gateway_for(tx.provider)?.process_payment(tx).await
    }

    async fn process_refund(&self, refund: &Refund, tx: &Transaction) -> Result<String, GatewayError> {
        self.gateway_for(tx.provider)?.process_refund(refund, tx).await
    }

    fn name(&self) -> &str {
        "router"
    }
}
