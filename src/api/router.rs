//! Route table and middleware stack.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use governor::{
    DefaultDirectRateLimiter, Quota, RateLimiter,
    clock::{Clock, DefaultClock},
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::admin;
use super::handlers::{self, ApiDoc};
use super::webhooks;
use crate::app::AppState;
use crate::domain::{ErrorDetail, RateLimitResponse};

/// Request bodies above this size are rejected with 413
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Requests taking longer than this are cut off with 408
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Global quota for user-facing routes
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 20,
        }
    }
}

impl RateLimitConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        use std::env;

        let defaults = Self::default();
        let requests_per_second = env::var("RATE_LIMIT_RPS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.requests_per_second);
        let burst_size = env::var("RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.burst_size);

        Self {
            requests_per_second,
            burst_size,
        }
    }

    fn quota(&self) -> Quota {
        let rps = NonZeroU32::new(self.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst_size).unwrap_or(rps);
        Quota::per_second(rps).allow_burst(burst)
    }
}

/// Build the router without rate limiting
pub fn create_router(app_state: Arc<AppState>) -> Router {
    build(app_state, None)
}

/// Build the router with a global quota on user-facing routes.
/// Webhooks, admin and health routes are never throttled.
pub fn create_router_with_rate_limit(app_state: Arc<AppState>, config: RateLimitConfig) -> Router {
    let limiter = Arc::new(RateLimiter::direct(config.quota()));
    build(app_state, Some(limiter))
}

fn build(app_state: Arc<AppState>, limiter: Option<Arc<DefaultDirectRateLimiter>>) -> Router {
    let mut user_routes = Router::new()
        .route("/users", post(handlers::register_handler))
        .route("/me", get(handlers::me_handler))
        .route("/me/transactions", get(handlers::list_transactions_handler))
        .route("/me/referrals", get(handlers::referral_summary_handler))
        .route("/me/loyalty/redeem", post(handlers::redeem_points_handler))
        .route(
            "/deposits",
            post(handlers::initiate_deposit_handler).get(handlers::list_deposits_handler),
        )
        .route(
            "/deposits/{reference}/verify",
            post(handlers::verify_deposit_handler),
        )
        .route(
            "/manual-payments",
            post(handlers::submit_manual_payment_handler)
                .get(handlers::list_manual_payments_handler),
        )
        .route("/catalog/price", get(handlers::price_handler))
        .route(
            "/rentals",
            post(handlers::rent_number_handler).get(handlers::list_rentals_handler),
        )
        .route("/rentals/{id}", get(handlers::get_rental_handler))
        .route("/rentals/{id}/check", post(handlers::check_sms_handler))
        .route("/rentals/{id}/cancel", post(handlers::cancel_rental_handler))
        .route(
            "/refund-requests",
            post(handlers::create_refund_request_handler)
                .get(handlers::list_refund_requests_handler),
        );

    if let Some(limiter) = limiter {
        user_routes = user_routes.layer(middleware::from_fn_with_state(limiter, rate_limit));
    }

    let webhook_routes = Router::new()
        .route(
            "/webhooks/bank-transfer",
            post(webhooks::bank_transfer_webhook_handler),
        )
        .route("/webhooks/crypto", post(webhooks::crypto_webhook_handler));

    let admin_routes = Router::new()
        .route("/admin/users", get(admin::list_users_handler))
        .route("/admin/users/{id}/adjust", post(admin::adjust_balance_handler))
        .route("/admin/users/{id}/suspend", post(admin::suspend_user_handler))
        .route(
            "/admin/manual-payments",
            get(admin::list_manual_payments_handler),
        )
        .route(
            "/admin/manual-payments/{id}/approve",
            post(admin::approve_manual_payment_handler),
        )
        .route(
            "/admin/manual-payments/{id}/reject",
            post(admin::reject_manual_payment_handler),
        )
        .route(
            "/admin/refund-requests",
            get(admin::list_refund_requests_handler),
        )
        .route(
            "/admin/refund-requests/{id}/approve",
            post(admin::approve_refund_request_handler),
        )
        .route(
            "/admin/refund-requests/{id}/reject",
            post(admin::reject_refund_request_handler),
        )
        .route("/admin/rentals/{id}/refund", post(admin::refund_rental_handler))
        .route("/admin/stats", get(admin::stats_handler));

    let health_routes = Router::new()
        .route("/health", get(handlers::health_check_handler))
        .route("/health/live", get(handlers::liveness_handler))
        .route("/health/ready", get(handlers::readiness_handler));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(user_routes)
        .merge(webhook_routes)
        .merge(admin_routes)
        .merge(health_routes)
        .with_state(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(timeout_layer(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Requests running past `timeout` are answered with 408
fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

async fn rate_limit(
    State(limiter): State<Arc<DefaultDirectRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        Ok(()) => next.run(request).await,
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            let retry_after = wait.as_secs().max(1);
            warn!(retry_after = %retry_after, "Rate limit exceeded");

            let body = Json(RateLimitResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: "Too many requests, slow down".to_string(),
                },
                retry_after,
            });
            let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
    }
}
