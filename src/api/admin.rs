//! Admin API handlers.
//!
//! Every handler takes [`AdminGuard`], so requests without a valid
//! `X-Admin-Key` never reach the services.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use super::auth::AdminGuard;
use crate::app::{ADMIN_REVIEWER, AppState};
use crate::domain::{
    AdjustBalanceRequest, AppError, ErrorResponse, ManualPayment, ManualPaymentQuery,
    PaginatedResponse, PaginationParams, RefundOutcome, RefundRequest, RefundRequestQuery,
    ReviewRequest, SuspendUserRequest, SystemStats, User, WalletTransaction,
};

/// Request body for a forced rental refund
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct AdminRefundRequest {
    /// Shown in the user's ledger
    #[schema(example = "Provider delivered the wrong code")]
    pub reason: Option<String>,
}

/// List users, newest first
#[utoipa::path(
    get,
    path = "/admin/users",
    tag = "admin",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of users to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor from the previous page")
    ),
    responses(
        (status = 200, description = "User page", body = PaginatedResponse<User>),
        (status = 401, description = "Missing admin key", body = ErrorResponse),
        (status = 403, description = "Invalid admin key or admin API disabled", body = ErrorResponse)
    )
)]
pub async fn list_users_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<User>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let page = state
        .service
        .admin_list_users(limit, params.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

/// Credit or debit a wallet
#[utoipa::path(
    post,
    path = "/admin/users/{id}/adjust",
    tag = "admin",
    params(
        ("id" = String, Path, description = "User ID")
    ),
    request_body = AdjustBalanceRequest,
    responses(
        (status = 200, description = "Ledger row written", body = WalletTransaction),
        (status = 400, description = "Zero amount or missing reason", body = ErrorResponse),
        (status = 402, description = "Debit exceeds the balance", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    )
)]
pub async fn adjust_balance_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<AdjustBalanceRequest>,
) -> Result<Json<WalletTransaction>, AppError> {
    let transaction = state.service.admin_adjust_balance(&id, &payload).await?;
    warn!(
        user_id = %id,
        amount = %payload.amount_kobo,
        reason = %payload.reason,
        "Admin adjusted wallet balance"
    );
    Ok(Json(transaction))
}

/// Suspend or reinstate an account
#[utoipa::path(
    post,
    path = "/admin/users/{id}/suspend",
    tag = "admin",
    params(
        ("id" = String, Path, description = "User ID")
    ),
    request_body = SuspendUserRequest,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 404, description = "User not found", body = ErrorResponse)
    )
)]
pub async fn suspend_user_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<SuspendUserRequest>,
) -> Result<Json<User>, AppError> {
    let user = state
        .service
        .admin_set_suspended(&id, payload.suspended)
        .await?;
    Ok(Json(user))
}

/// Manual payment claims, optionally filtered by status
#[utoipa::path(
    get,
    path = "/admin/manual-payments",
    tag = "admin",
    params(
        ("status" = Option<String>, Query, description = "pending, approved or rejected"),
        ("limit" = Option<i64>, Query, description = "Maximum number of claims to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor from the previous page")
    ),
    responses(
        (status = 200, description = "Claim page", body = PaginatedResponse<ManualPayment>),
        (status = 403, description = "Invalid admin key or admin API disabled", body = ErrorResponse)
    )
)]
pub async fn list_manual_payments_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ManualPaymentQuery>,
) -> Result<Json<PaginatedResponse<ManualPayment>>, AppError> {
    let limit = query.limit.clamp(1, 100);
    let page = state
        .payments
        .list_manual_payments(None, query.status, limit, query.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

/// Approve a claim and credit the wallet
#[utoipa::path(
    post,
    path = "/admin/manual-payments/{id}/approve",
    tag = "admin",
    params(
        ("id" = String, Path, description = "Manual payment ID")
    ),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Claim approved", body = ManualPayment),
        (status = 404, description = "Claim not found", body = ErrorResponse),
        (status = 409, description = "Claim already reviewed", body = ErrorResponse)
    )
)]
pub async fn approve_manual_payment_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<ManualPayment>, AppError> {
    let payment = state
        .payments
        .approve_manual_payment(&id, ADMIN_REVIEWER, payload.note.as_deref())
        .await?;
    Ok(Json(payment))
}

/// Reject a claim
#[utoipa::path(
    post,
    path = "/admin/manual-payments/{id}/reject",
    tag = "admin",
    params(
        ("id" = String, Path, description = "Manual payment ID")
    ),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Claim rejected", body = ManualPayment),
        (status = 404, description = "Claim not found", body = ErrorResponse),
        (status = 409, description = "Claim already reviewed", body = ErrorResponse)
    )
)]
pub async fn reject_manual_payment_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<ManualPayment>, AppError> {
    let payment = state
        .payments
        .reject_manual_payment(&id, ADMIN_REVIEWER, payload.note.as_deref())
        .await?;
    Ok(Json(payment))
}

/// Refund requests, optionally filtered by status
#[utoipa::path(
    get,
    path = "/admin/refund-requests",
    tag = "admin",
    params(
        ("status" = Option<String>, Query, description = "pending, approved or rejected"),
        ("limit" = Option<i64>, Query, description = "Maximum number of requests to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor from the previous page")
    ),
    responses(
        (status = 200, description = "Request page", body = PaginatedResponse<RefundRequest>),
        (status = 403, description = "Invalid admin key or admin API disabled", body = ErrorResponse)
    )
)]
pub async fn list_refund_requests_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Query(query): Query<RefundRequestQuery>,
) -> Result<Json<PaginatedResponse<RefundRequest>>, AppError> {
    let limit = query.limit.clamp(1, 100);
    let page = state
        .refunds
        .list_refund_requests(None, query.status, limit, query.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

/// Refund the disputed rental and close the request
#[utoipa::path(
    post,
    path = "/admin/refund-requests/{id}/approve",
    tag = "admin",
    params(
        ("id" = String, Path, description = "Refund request ID")
    ),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Request approved", body = RefundRequest),
        (status = 404, description = "Request not found", body = ErrorResponse),
        (status = 409, description = "Request already resolved", body = ErrorResponse)
    )
)]
pub async fn approve_refund_request_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<RefundRequest>, AppError> {
    let request = state
        .refunds
        .approve_refund_request(&id, payload.note.as_deref())
        .await?;
    Ok(Json(request))
}

/// Close a refund request without refunding
#[utoipa::path(
    post,
    path = "/admin/refund-requests/{id}/reject",
    tag = "admin",
    params(
        ("id" = String, Path, description = "Refund request ID")
    ),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Request rejected", body = RefundRequest),
        (status = 404, description = "Request not found", body = ErrorResponse),
        (status = 409, description = "Request already resolved", body = ErrorResponse)
    )
)]
pub async fn reject_refund_request_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<RefundRequest>, AppError> {
    let request = state
        .refunds
        .reject_refund_request(&id, payload.note.as_deref())
        .await?;
    Ok(Json(request))
}

/// Force a refund of any rental that has not been refunded
#[utoipa::path(
    post,
    path = "/admin/rentals/{id}/refund",
    tag = "admin",
    params(
        ("id" = String, Path, description = "Rental ID")
    ),
    request_body = AdminRefundRequest,
    responses(
        (status = 200, description = "Refund result", body = RefundOutcome),
        (status = 404, description = "Rental not found", body = ErrorResponse)
    )
)]
pub async fn refund_rental_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<AdminRefundRequest>,
) -> Result<Json<RefundOutcome>, AppError> {
    let outcome = state
        .refunds
        .admin_refund_rental(&id, payload.reason.as_deref())
        .await?;
    warn!(rental_id = %id, outcome = ?outcome, "Admin refunded rental");
    Ok(Json(outcome))
}

/// Dashboard totals
#[utoipa::path(
    get,
    path = "/admin/stats",
    tag = "admin",
    responses(
        (status = 200, description = "System statistics", body = SystemStats),
        (status = 403, description = "Invalid admin key or admin API disabled", body = ErrorResponse)
    )
)]
pub async fn stats_handler(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStats>, AppError> {
    let stats = state.service.system_stats().await?;
    Ok(Json(stats))
}
