//! Rate limiting middleware using Governor.
//!
//! Implements per-partner rate limiting with a token bucket algorithm sized
//! from each partner's `rate_limit_per_minute`.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::{num::NonZeroU32, sync::Arc};

use partnerpay_types::{ErrorResponse, PartnerId};

use super::auth::AuthenticatedPartner;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter state shared across requests.
#[derive(Default)]
pub struct RateLimiterState {
    /// Per-partner limiters, tagged with the quota they were built for
    limiters: DashMap<PartnerId, (u32, Arc<DirectLimiter>)>,
}

impl RateLimiterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if a request should be rate limited.
    /// Returns true if the request is allowed, false if rate limited.
    ///
    /// A changed `per_minute` (e.g. after the partner was updated) replaces
    /// the partner's bucket.
    pub fn check(&self, partner_id: PartnerId, per_minute: u32) -> bool {
        let limiter = {
            let mut entry = self
                .limiters
                .entry(partner_id)
                .or_insert_with(|| (per_minute, Arc::new(build_limiter(per_minute))));
            if entry.0 != per_minute {
                *entry = (per_minute, Arc::new(build_limiter(per_minute)));
            }
            entry.1.clone()
        };

        limiter.check().is_ok()
    }
}

fn build_limiter(per_minute: u32) -> DirectLimiter {
    let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
    RateLimiter::direct(quota)
}

/// Rate limiting middleware.
/// Expects the partner to be resolved by the auth middleware first.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(partner) = request.extensions().get::<AuthenticatedPartner>().copied() else {
        return next.run(request).await;
    };

    if !limiter.check(partner.id, partner.rate_limit_per_minute) {
        tracing::warn!(partner_id = %partner.id, "rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: "Rate limit exceeded. Please try again later.".into(),
                code: "RATE_LIMITED".into(),
                status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            }),
        )
            .into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("60"));
        return response;
    }

    next.run(request).await
}
