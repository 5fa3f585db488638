//! Authentication middleware for partner API keys.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use partnerpay_types::{AppError, PartnerId, PartnerRepository, TransactionStore};

use super::error::ApiError;
use super::handlers::AppState;

/// The partner resolved from the request's API key.
///
/// Inserted as a request extension by [`auth_middleware`].
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedPartner {
    pub id: PartnerId,
    pub rate_limit_per_minute: u32,
}

/// Extracts the API key from the Authorization header.
/// Expected format: "Bearer <api_key>" or just "<api_key>"
fn extract_api_key(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?.trim_start();
    let key = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    (!key.is_empty()).then_some(key)
}

/// Resolves the API key to an active partner.
///
/// Unknown keys are rejected with 401 and inactive partners with 403.
pub async fn auth_middleware<R: TransactionStore + PartnerRepository>(
    State(state): State<Arc<AppState<R>>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(api_key) = extract_api_key(auth_header) else {
        return ApiError(AppError::Unauthorized(
            "Missing or invalid Authorization header".into(),
        ))
        .into_response();
    };

    match state.service.authenticate(api_key).await {
        Ok(partner) => {
            tracing::debug!(partner_id = %partner.id, "request authenticated");
            request.extensions_mut().insert(AuthenticatedPartner {
                id: partner.id,
                rate_limit_per_minute: partner.rate_limit_per_minute,
            });
            next.run(request).await
        }
        Err(e) => {
            if !matches!(e, AppError::Unauthorized(_) | AppError::PartnerInactive) {
                tracing::error!("API key verification failed: {}", e);
            }
            ApiError(e).into_response()
        }
    }
}
