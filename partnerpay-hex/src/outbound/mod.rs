//! Outbound adapters: payment gateways, audit sinks and webhook delivery.

pub mod audit;
pub mod gateway;
pub mod webhook;

pub use audit::TracingAuditLogger;
pub use gateway::{MockPaymentGateway, ProviderRouter};
pub use webhook::{NotificationQueue, SIGNATURE_HEADER, WebhookDispatcher};
