//! Payment gateway webhooks.
//!
//! Signatures are computed over the exact bytes the gateway sent, so these
//! handlers take the raw body instead of `Json`.

use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use tracing::info;

use crate::app::AppState;
use crate::domain::{AppError, ErrorResponse, PaymentProvider, PaymentUpdateResponse};
use crate::infra::payments::{BANK_SIGNATURE_HEADER, CRYPTO_SIGNATURE_HEADER};

async fn dispatch(
    state: &AppState,
    provider: PaymentProvider,
    header: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Json<PaymentUpdateResponse>, AppError> {
    let signature = headers.get(header).and_then(|v| v.to_str().ok());
    let response = state
        .payments
        .handle_webhook(provider, body, signature)
        .await?;

    info!(
        provider = %provider,
        reference = %response.reference,
        result = ?response.result,
        "Webhook processed"
    );
    Ok(Json(response))
}

/// Bank transfer aggregator notification
///
/// Signed with HMAC-SHA512 of the raw body in `x-paystack-signature`.
#[utoipa::path(
    post,
    path = "/webhooks/bank-transfer",
    tag = "webhooks",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event acknowledged", body = PaymentUpdateResponse),
        (status = 400, description = "Malformed event", body = ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = ErrorResponse)
    )
)]
pub async fn bank_transfer_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PaymentUpdateResponse>, AppError> {
    dispatch(
        &state,
        PaymentProvider::BankTransfer,
        BANK_SIGNATURE_HEADER,
        &headers,
        &body,
    )
    .await
}

/// Crypto gateway IPN
///
/// Signed with HMAC-SHA512 of the key-sorted JSON body in `x-nowpayments-sig`.
#[utoipa::path(
    post,
    path = "/webhooks/crypto",
    tag = "webhooks",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event acknowledged", body = PaymentUpdateResponse),
        (status = 400, description = "Malformed event", body = ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = ErrorResponse)
    )
)]
pub async fn crypto_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PaymentUpdateResponse>, AppError> {
    dispatch(
        &state,
        PaymentProvider::Crypto,
        CRYPTO_SIGNATURE_HEADER,
        &headers,
        &body,
    )
    .await
}
