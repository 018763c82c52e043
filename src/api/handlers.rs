//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use utoipa::OpenApi;
use validator::Validate;

use super::admin;
use super::auth::AuthUser;
use super::webhooks;
use crate::app::AppState;
use crate::domain::{
    AppError, CreateRefundRequest, DatabaseError, Deposit, ErrorDetail, ErrorResponse,
    ExternalServiceError, HealthResponse, HealthStatus, InitiateDepositRequest,
    InitiateDepositResponse, ManualPayment, PaginatedResponse, PaginationParams,
    PaymentUpdateResponse, PriceQuery, PriceQuote, RateLimitResponse, RedeemPointsRequest,
    RedemptionResult, ReferralSummary, RefundRequest, RegisterUserRequest, RegisterUserResponse,
    Rental, RentNumberRequest, SubmitManualPaymentRequest, User, WalletTransaction,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "InstantNums API",
        version = "0.1.0",
        description = "Wallet funding, SMS number rentals, refunds and rewards",
        contact(
            name = "API Support",
            email = "support@instantnums.com"
        ),
        license(
            name = "MIT"
        )
    ),
    paths(
        register_handler,
        me_handler,
        list_transactions_handler,
        referral_summary_handler,
        redeem_points_handler,
        initiate_deposit_handler,
        list_deposits_handler,
        verify_deposit_handler,
        submit_manual_payment_handler,
        list_manual_payments_handler,
        price_handler,
        rent_number_handler,
        list_rentals_handler,
        get_rental_handler,
        check_sms_handler,
        cancel_rental_handler,
        create_refund_request_handler,
        list_refund_requests_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
        webhooks::bank_transfer_webhook_handler,
        webhooks::crypto_webhook_handler,
        admin::list_users_handler,
        admin::adjust_balance_handler,
        admin::suspend_user_handler,
        admin::list_manual_payments_handler,
        admin::approve_manual_payment_handler,
        admin::reject_manual_payment_handler,
        admin::list_refund_requests_handler,
        admin::approve_refund_request_handler,
        admin::reject_refund_request_handler,
        admin::refund_rental_handler,
        admin::stats_handler,
    ),
    components(
        schemas(
            User,
            RegisterUserRequest,
            RegisterUserResponse,
            WalletTransaction,
            crate::domain::TransactionKind,
            PaginationParams,
            PaginatedResponse<WalletTransaction>,
            PaginatedResponse<Deposit>,
            PaginatedResponse<ManualPayment>,
            PaginatedResponse<Rental>,
            PaginatedResponse<RefundRequest>,
            PaginatedResponse<User>,
            Deposit,
            crate::domain::DepositStatus,
            crate::domain::PaymentProvider,
            InitiateDepositRequest,
            InitiateDepositResponse,
            PaymentUpdateResponse,
            crate::domain::PaymentUpdate,
            ManualPayment,
            crate::domain::ManualPaymentStatus,
            SubmitManualPaymentRequest,
            crate::domain::ReviewRequest,
            PriceQuote,
            Rental,
            crate::domain::RentalStatus,
            RentNumberRequest,
            RefundRequest,
            crate::domain::RefundRequestStatus,
            CreateRefundRequest,
            crate::domain::RefundOutcome,
            ReferralSummary,
            crate::domain::ReferredUser,
            RedeemPointsRequest,
            RedemptionResult,
            crate::domain::AdjustBalanceRequest,
            crate::domain::SuspendUserRequest,
            crate::domain::SystemStats,
            admin::AdminRefundRequest,
            HealthResponse,
            HealthStatus,
            crate::domain::ComponentHealth,
            ErrorResponse,
            ErrorDetail,
            RateLimitResponse,
        )
    ),
    tags(
        (name = "account", description = "Registration, profile, ledger and rewards"),
        (name = "payments", description = "Wallet deposits and manual payments"),
        (name = "rentals", description = "SMS number rentals and refund requests"),
        (name = "webhooks", description = "Payment gateway notifications"),
        (name = "admin", description = "Back-office endpoints (X-Admin-Key)"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Create an account
///
/// The returned `api_token` is shown once; send it as `Authorization: Bearer <token>`.
#[utoipa::path(
    post,
    path = "/users",
    tag = "account",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterUserResponse),
        (status = 400, description = "Invalid email, name or referral code", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse)
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<RegisterUserResponse>), AppError> {
    let response = state.service.register(&payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Current user profile and wallet balance
#[utoipa::path(
    get,
    path = "/me",
    tag = "account",
    responses(
        (status = 200, description = "Profile", body = User),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Account suspended", body = ErrorResponse)
    )
)]
pub async fn me_handler(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

/// Wallet ledger, newest first
#[utoipa::path(
    get,
    path = "/me/transactions",
    tag = "account",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of rows to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor from the previous page")
    ),
    responses(
        (status = 200, description = "Ledger page", body = PaginatedResponse<WalletTransaction>),
        (status = 400, description = "Invalid cursor", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn list_transactions_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<WalletTransaction>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let page = state
        .service
        .list_transactions(&user.id, limit, params.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

/// Referral code, referred users and bonuses earned
#[utoipa::path(
    get,
    path = "/me/referrals",
    tag = "account",
    responses(
        (status = 200, description = "Referral summary", body = ReferralSummary),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn referral_summary_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<ReferralSummary>, AppError> {
    let summary = state.service.referral_summary(&user).await?;
    Ok(Json(summary))
}

/// Convert loyalty points into wallet credit
#[utoipa::path(
    post,
    path = "/me/loyalty/redeem",
    tag = "account",
    request_body = RedeemPointsRequest,
    responses(
        (status = 200, description = "Points redeemed", body = RedemptionResult),
        (status = 400, description = "Below the minimum or more than owned", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn redeem_points_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(payload): Json<RedeemPointsRequest>,
) -> Result<Json<RedemptionResult>, AppError> {
    payload.validate()?;
    let result = state.service.redeem_points(&user, payload.points).await?;
    Ok(Json(result))
}

/// Start a bank transfer or crypto deposit
///
/// Returns the hosted checkout URL. The wallet is credited when the gateway
/// notifies us (or on `POST /deposits/{reference}/verify`).
#[utoipa::path(
    post,
    path = "/deposits",
    tag = "payments",
    request_body = InitiateDepositRequest,
    responses(
        (status = 200, description = "Checkout created", body = InitiateDepositResponse),
        (status = 400, description = "Below the minimum or unsupported provider", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 502, description = "Gateway error", body = ErrorResponse)
    )
)]
pub async fn initiate_deposit_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(payload): Json<InitiateDepositRequest>,
) -> Result<Json<InitiateDepositResponse>, AppError> {
    let response = state.payments.initiate_deposit(&user, &payload).await?;
    Ok(Json(response))
}

/// The caller's deposits, newest first
#[utoipa::path(
    get,
    path = "/deposits",
    tag = "payments",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of deposits to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor from the previous page")
    ),
    responses(
        (status = 200, description = "Deposit page", body = PaginatedResponse<Deposit>),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn list_deposits_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<Deposit>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let page = state
        .payments
        .list_deposits(&user.id, limit, params.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

/// Re-check a pending deposit with the gateway
#[utoipa::path(
    post,
    path = "/deposits/{reference}/verify",
    tag = "payments",
    params(
        ("reference" = String, Path, description = "Deposit reference (INS-...)")
    ),
    responses(
        (status = 200, description = "Verification result", body = PaymentUpdateResponse),
        (status = 404, description = "Deposit not found", body = ErrorResponse),
        (status = 501, description = "Gateway has no status lookup", body = ErrorResponse),
        (status = 502, description = "Gateway error", body = ErrorResponse)
    )
)]
pub async fn verify_deposit_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(reference): Path<String>,
) -> Result<Json<PaymentUpdateResponse>, AppError> {
    let response = state.payments.verify_deposit(&user, &reference).await?;
    Ok(Json(response))
}

/// Submit a bank transfer receipt for admin review
#[utoipa::path(
    post,
    path = "/manual-payments",
    tag = "payments",
    request_body = SubmitManualPaymentRequest,
    responses(
        (status = 201, description = "Claim recorded", body = ManualPayment),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn submit_manual_payment_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(payload): Json<SubmitManualPaymentRequest>,
) -> Result<(StatusCode, Json<ManualPayment>), AppError> {
    let payment = state.payments.submit_manual_payment(&user, &payload).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// The caller's manual payment claims
#[utoipa::path(
    get,
    path = "/manual-payments",
    tag = "payments",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of claims to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor from the previous page")
    ),
    responses(
        (status = 200, description = "Claim page", body = PaginatedResponse<ManualPayment>),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn list_manual_payments_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<ManualPayment>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let page = state
        .payments
        .list_manual_payments(Some(&user.id), None, limit, params.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

/// Retail price of a number
#[utoipa::path(
    get,
    path = "/catalog/price",
    tag = "rentals",
    params(
        ("service" = String, Query, description = "Service name, e.g. whatsapp"),
        ("country" = String, Query, description = "Country name, e.g. nigeria")
    ),
    responses(
        (status = 200, description = "Current price", body = PriceQuote),
        (status = 400, description = "Missing service or country", body = ErrorResponse),
        (status = 502, description = "No stock or provider error", body = ErrorResponse)
    )
)]
pub async fn price_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(_user): AuthUser,
    Query(params): Query<PriceQuery>,
) -> Result<Json<PriceQuote>, AppError> {
    params.validate()?;
    let quote = state.rentals.quote(&params.service, &params.country).await?;
    Ok(Json(quote))
}

/// Rent a number
///
/// The price is debited before the number is bought; any provider failure
/// refunds it.
#[utoipa::path(
    post,
    path = "/rentals",
    tag = "rentals",
    request_body = RentNumberRequest,
    responses(
        (status = 201, description = "Number rented", body = Rental),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 402, description = "Wallet balance too low", body = ErrorResponse),
        (status = 502, description = "No stock or provider error", body = ErrorResponse)
    )
)]
pub async fn rent_number_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(payload): Json<RentNumberRequest>,
) -> Result<(StatusCode, Json<Rental>), AppError> {
    let rental = state.rentals.rent_number(&user, &payload).await?;
    Ok((StatusCode::CREATED, Json(rental)))
}

/// The caller's rentals, newest first
#[utoipa::path(
    get,
    path = "/rentals",
    tag = "rentals",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of rentals to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor from the previous page")
    ),
    responses(
        (status = 200, description = "Rental page", body = PaginatedResponse<Rental>),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn list_rentals_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<Rental>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let page = state
        .rentals
        .list_rentals(&user.id, limit, params.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

/// A single rental
#[utoipa::path(
    get,
    path = "/rentals/{id}",
    tag = "rentals",
    params(
        ("id" = String, Path, description = "Rental ID")
    ),
    responses(
        (status = 200, description = "Rental found", body = Rental),
        (status = 404, description = "Rental not found", body = ErrorResponse)
    )
)]
pub async fn get_rental_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Rental>, AppError> {
    let rental = state.rentals.get_rental(&user, &id).await?;
    Ok(Json(rental))
}

/// Poll the provider for the SMS code
#[utoipa::path(
    post,
    path = "/rentals/{id}/check",
    tag = "rentals",
    params(
        ("id" = String, Path, description = "Rental ID")
    ),
    responses(
        (status = 200, description = "Rental after the check", body = Rental),
        (status = 404, description = "Rental not found", body = ErrorResponse),
        (status = 502, description = "Provider error", body = ErrorResponse)
    )
)]
pub async fn check_sms_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Rental>, AppError> {
    let rental = state.rentals.check_sms(&user, &id).await?;
    Ok(Json(rental))
}

/// Cancel an unused number and refund it
#[utoipa::path(
    post,
    path = "/rentals/{id}/cancel",
    tag = "rentals",
    params(
        ("id" = String, Path, description = "Rental ID")
    ),
    responses(
        (status = 200, description = "Rental cancelled and refunded", body = Rental),
        (status = 404, description = "Rental not found", body = ErrorResponse),
        (status = 409, description = "Rental is not active or already has a code", body = ErrorResponse)
    )
)]
pub async fn cancel_rental_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Rental>, AppError> {
    let rental = state.rentals.cancel_rental(&user, &id).await?;
    Ok(Json(rental))
}

/// Dispute a completed rental whose code did not work
#[utoipa::path(
    post,
    path = "/refund-requests",
    tag = "rentals",
    request_body = CreateRefundRequest,
    responses(
        (status = 201, description = "Request filed", body = RefundRequest),
        (status = 404, description = "Rental not found", body = ErrorResponse),
        (status = 409, description = "Rental not completed, already refunded, or a request is open", body = ErrorResponse)
    )
)]
pub async fn create_refund_request_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CreateRefundRequest>,
) -> Result<(StatusCode, Json<RefundRequest>), AppError> {
    let request = state.refunds.request_refund(&user, &payload).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// The caller's refund requests
#[utoipa::path(
    get,
    path = "/refund-requests",
    tag = "rentals",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of requests to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor from the previous page")
    ),
    responses(
        (status = 200, description = "Request page", body = PaginatedResponse<RefundRequest>),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn list_refund_requests_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<RefundRequest>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let page = state
        .refunds
        .list_refund_requests(Some(&user.id), None, limit, params.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
///
/// Only the database gates readiness; provider outages degrade `/health`.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Database unreachable")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.service.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::ExternalService(ext_err) => match ext_err {
                ExternalServiceError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                ExternalServiceError::RateLimited(_) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::BAD_GATEWAY,
                    "external_service_error",
                    self.to_string(),
                ),
            },
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::InsufficientFunds { .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_funds",
                self.to_string(),
            ),
            AppError::InvalidState(_) => {
                (StatusCode::CONFLICT, "invalid_state", self.to_string())
            }
            AppError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                self.to_string(),
            ),
            AppError::Authorization(_) => (
                StatusCode::FORBIDDEN,
                "authorization_error",
                self.to_string(),
            ),
            AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialization_error",
                self.to_string(),
            ),
            AppError::Deserialization(_) => (
                StatusCode::BAD_REQUEST,
                "deserialization_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded".to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
