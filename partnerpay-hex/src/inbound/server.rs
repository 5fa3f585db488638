//! HTTP Server configuration and startup.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use partnerpay_types::{PartnerRepository, TransactionStore};

use super::auth::auth_middleware;
use super::handlers::{self, AppState};
use super::rate_limit::{RateLimiterState, rate_limit_middleware};
use crate::PaymentService;
use crate::openapi::ApiDoc;

/// HTTP Server for the PartnerPay API.
pub struct HttpServer<R: TransactionStore + PartnerRepository> {
    state: Arc<AppState<R>>,
    rate_limiter: Arc<RateLimiterState>,
}

impl<R: TransactionStore + PartnerRepository> HttpServer<R> {
    /// Creates a new HTTP server with the given service.
    pub fn new(service: PaymentService<R>) -> Self {
        Self {
            state: Arc::new(AppState { service }),
            rate_limiter: Arc::new(RateLimiterState::new()),
        }
    }

    /// Builds the Axum router with all routes.
    ///
    /// Health probes and API docs are public; everything under `/api/v1`
    /// goes through authentication, then per-partner rate limiting.
    pub fn router(&self) -> Router {
        // Build HTTP metrics layer (uses globally set MeterProvider)
        let metrics = axum_otel_metrics::HttpMetricsLayerBuilder::new().build();

        let api = Router::new()
            .route(
                "/transactions",
                post(handlers::create_transaction::<R>).get(handlers::list_transactions::<R>),
            )
            .route("/transactions/{id}", get(handlers::get_transaction::<R>))
            .route(
                "/transactions/{id}/process",
                post(handlers::process_transaction::<R>),
            )
            .route(
                "/transactions/{id}/retry",
                post(handlers::retry_transaction::<R>),
            )
            .route(
                "/transactions/{id}/cancel",
                post(handlers::cancel_transaction::<R>),
            )
            .route(
                "/transactions/{id}/refund",
                post(handlers::refund_transaction::<R>),
            )
            .route(
                "/transactions/{id}/refunds",
                get(handlers::list_refunds::<R>),
            )
            .layer(middleware::from_fn_with_state(
                self.rate_limiter.clone(),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth_middleware::<R>,
            ));

        Router::new()
            .route("/health", get(handlers::health))
            .route("/health/live", get(handlers::live))
            .route("/health/ready", get(handlers::ready::<R>))
            .nest("/api/v1", api)
            .with_state(self.state.clone())
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
            .layer(metrics)
            .layer(TraceLayer::new_for_http())
    }

    /// Runs the server on the given address with graceful shutdown.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
