//! Payment provider port.

use crate::domain::{Refund, Transaction};

/// Error reported by a payment provider.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct GatewayError {
    pub code: String,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Black-box payment provider. May be slow; never retried by the engine.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges the transaction and returns the provider's transaction id.
    async fn process_payment(&self, tx: &Transaction) -> Result<String, GatewayError>;

    /// Refunds part of a charge and returns the provider's refund id.
    async fn process_refund(&self, refund: &Refund, tx: &Transaction)
    -> Result<String, GatewayError>;

    fn name(&self) -> &str;
}
