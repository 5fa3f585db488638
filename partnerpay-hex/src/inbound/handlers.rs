//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use partnerpay_types::{
    AppError, CreateTransactionRequest, ListTransactionsQuery, PartnerId, PartnerRepository,
    RefundRequest, RefundResponse, TransactionId, TransactionResponse, TransactionStore,
};

use super::auth::AuthenticatedPartner;
use super::error::ApiError;
use crate::PaymentService;

/// Header accepted as an alternative to the body's `idempotency_key`.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Application state shared across handlers.
pub struct AppState<R: TransactionStore + PartnerRepository> {
    pub service: PaymentService<R>,
}

fn parse_transaction_id(id: &str) -> Result<TransactionId, ApiError> {
    id.parse()
        .map_err(|_| ApiError(AppError::Validation("Invalid transaction ID".into())))
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Liveness probe: the process is serving requests.
pub async fn live() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe: the store answers a query.
pub async fn ready<R: TransactionStore + PartnerRepository>(
    State(state): State<Arc<AppState<R>>>,
) -> impl IntoResponse {
    match state.service.store().get_partner(PartnerId::new()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ready" })),
        ),
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

/// Create a transaction. Replays with the same idempotency key return the
/// stored transaction with 200 instead of 201.
#[tracing::instrument(skip_all, fields(partner_id = %partner.id))]
pub async fn create_transaction<R: TransactionStore + PartnerRepository>(
    State(state): State<Arc<AppState<R>>>,
    Extension(partner): Extension<AuthenticatedPartner>,
    headers: HeaderMap,
    payload: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut req) = payload?;
    if req.idempotency_key.is_none() {
        req.idempotency_key = headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
    }

    let reservation = state.service.create_transaction(partner.id, req).await?;
    let status = if reservation.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(TransactionResponse::from(reservation.into_transaction())),
    ))
}

/// List the partner's transactions, newest first.
#[tracing::instrument(skip_all, fields(partner_id = %partner.id))]
pub async fn list_transactions<R: TransactionStore + PartnerRepository>(
    State(state): State<Arc<AppState<R>>>,
    Extension(partner): Extension<AuthenticatedPartner>,
    query: Result<Query<ListTransactionsQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let transactions = state.service.list_transactions(partner.id, &query).await?;
    let response: Vec<TransactionResponse> = transactions.into_iter().map(Into::into).collect();
    Ok(Json(response))
}

#[tracing::instrument(skip_all, fields(partner_id = %partner.id, transaction_id = %id))]
pub async fn get_transaction<R: TransactionStore + PartnerRepository>(
    State(state): State<Arc<AppState<R>>>,
    Extension(partner): Extension<AuthenticatedPartner>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_transaction_id(&id)?;
    let tx = state.service.get_transaction(partner.id, id).await?;
    Ok(Json(TransactionResponse::from(tx)))
}

/// Charge a pending transaction.
#[tracing::instrument(skip_all, fields(partner_id = %partner.id, transaction_id = %id))]
pub async fn process_transaction<R: TransactionStore + PartnerRepository>(
    State(state): State<Arc<AppState<R>>>,
    Extension(partner): Extension<AuthenticatedPartner>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_transaction_id(&id)?;
    let tx = state.service.process_transaction(partner.id, id).await?;
    Ok(Json(TransactionResponse::from(tx)))
}

/// Charge a failed transaction again.
#[tracing::instrument(skip_all, fields(partner_id = %partner.id, transaction_id = %id))]
pub async fn retry_transaction<R: TransactionStore + PartnerRepository>(
    State(state): State<Arc<AppState<R>>>,
    Extension(partner): Extension<AuthenticatedPartner>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_transaction_id(&id)?;
    let tx = state.service.retry_transaction(partner.id, id).await?;
    Ok(Json(TransactionResponse::from(tx)))
}

#[tracing::instrument(skip_all, fields(partner_id = %partner.id, transaction_id = %id))]
pub async fn cancel_transaction<R: TransactionStore + PartnerRepository>(
    State(state): State<Arc<AppState<R>>>,
    Extension(partner): Extension<AuthenticatedPartner>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_transaction_id(&id)?;
    let tx = state.service.cancel_transaction(partner.id, id).await?;
    Ok(Json(TransactionResponse::from(tx)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Refunds
// ─────────────────────────────────────────────────────────────────────────────

/// Refund part or all of a completed transaction.
#[tracing::instrument(skip_all, fields(partner_id = %partner.id, transaction_id = %id))]
pub async fn refund_transaction<R: TransactionStore + PartnerRepository>(
    State(state): State<Arc<AppState<R>>>,
    Extension(partner): Extension<AuthenticatedPartner>,
    Path(id): Path<String>,
    payload: Result<Json<RefundRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_transaction_id(&id)?;
    let Json(req) = payload?;
    let refund = state.service.request_refund(partner.id, id, &req).await?;
    Ok((StatusCode::CREATED, Json(RefundResponse::from(refund))))
}

#[tracing::instrument(skip_all, fields(partner_id = %partner.id, transaction_id = %id))]
pub async fn list_refunds<R: TransactionStore + PartnerRepository>(
    State(state): State<Arc<AppState<R>>>,
    Extension(partner): Extension<AuthenticatedPartner>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_transaction_id(&id)?;
    let refunds = state.service.list_refunds(partner.id, id).await?;
    let response: Vec<RefundResponse> = refunds.into_iter().map(Into::into).collect();
    Ok(Json(response))
}
