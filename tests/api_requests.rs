//! Additional integration tests for specific request flows.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::AUTHORIZATION},
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use instantnums_backend::api::{ADMIN_KEY_HEADER, create_router};
use instantnums_backend::app::{AppState, ServiceSettings};
use instantnums_backend::domain::{
    GatewayOutcome, PaginatedResponse, PaymentGateway, PaymentProvider, WalletTransaction,
};
use instantnums_backend::test_utils::{
    MockDatabaseClient, MockNotifier, MockPaymentGateway, MockSmsProvider,
};

const ADMIN_KEY: &str = "flow-admin-key";

struct Harness {
    router: Router,
    db: Arc<MockDatabaseClient>,
    bank: Arc<MockPaymentGateway>,
    notifier: Arc<MockNotifier>,
}

fn harness() -> Harness {
    let db = Arc::new(MockDatabaseClient::new());
    let bank = Arc::new(MockPaymentGateway::new(PaymentProvider::BankTransfer));
    let crypto = Arc::new(MockPaymentGateway::new(PaymentProvider::Crypto));
    let notifier = Arc::new(MockNotifier::new());
    let state = AppState::new(
        db.clone(),
        Arc::new(MockSmsProvider::new()),
        vec![
            bank.clone() as Arc<dyn PaymentGateway>,
            crypto as Arc<dyn PaymentGateway>,
        ],
        notifier.clone(),
        ServiceSettings::default(),
    )
    .with_admin_key(SecretString::from(ADMIN_KEY));

    Harness {
        router: create_router(Arc::new(state)),
        db,
        bank,
        notifier,
    }
}

async fn call(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    if uri.starts_with("/admin") {
        builder = builder.header(ADMIN_KEY_HEADER, ADMIN_KEY);
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Register a user and return `(user_id, token)`
async fn signup(router: &Router, email: &str) -> (String, String) {
    let (status, body) = call(
        router,
        "POST",
        "/users",
        None,
        Some(json!({ "email": email, "display_name": "Flow User" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (
        body["user"]["id"].as_str().unwrap().to_string(),
        body["api_token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn test_transactions_pagination_flow() {
    let h = harness();
    let (user_id, token) = signup(&h.router, "ada@example.com").await;

    for i in 1..=5 {
        let (status, _) = call(
            &h.router,
            "POST",
            &format!("/admin/users/{}/adjust", user_id),
            None,
            Some(json!({ "amount_kobo": i * 1_000, "reason": format!("Top up {}", i) })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = call(&h.router, "GET", "/me/transactions?limit=2", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let page1: PaginatedResponse<WalletTransaction> = serde_json::from_value(body).unwrap();
    assert_eq!(page1.items.len(), 2);
    assert!(page1.has_more);
    assert_eq!(page1.items[0].amount_kobo, 5_000);
    assert_eq!(page1.items[0].balance_after_kobo, 15_000);

    let cursor = page1.next_cursor.unwrap();
    let (_, body) = call(
        &h.router,
        "GET",
        &format!("/me/transactions?limit=2&cursor={}", cursor),
        Some(&token),
        None,
    )
    .await;
    let page2: PaginatedResponse<WalletTransaction> = serde_json::from_value(body).unwrap();
    assert_eq!(page2.items[0].amount_kobo, 3_000);

    let (status, body) = call(
        &h.router,
        "GET",
        "/me/transactions?cursor=bogus",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "validation_error");
}

#[tokio::test]
async fn test_verify_deposit_flow() {
    let h = harness();
    let (user_id, token) = signup(&h.router, "ada@example.com").await;

    let (_, body) = call(
        &h.router,
        "POST",
        "/deposits",
        Some(&token),
        Some(json!({ "provider": "bank_transfer", "amount_kobo": 250_000 })),
    )
    .await;
    let reference = body["deposit"]["reference"].as_str().unwrap().to_string();
    assert_eq!(h.bank.checkouts().len(), 1);
    let verify = format!("/deposits/{}/verify", reference);

    // No status lookup configured on the gateway
    let (status, body) = call(&h.router, "POST", &verify, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["error"]["type"], "not_supported");

    h.bank.set_status(Some(GatewayOutcome::Pending));
    let (_, body) = call(&h.router, "POST", &verify, Some(&token), None).await;
    assert_eq!(body["result"], "still_pending");

    h.bank.set_status(Some(GatewayOutcome::Succeeded { amount_kobo: None }));
    let (status, body) = call(&h.router, "POST", &verify, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "credited");

    let (_, body) = call(&h.router, "POST", &verify, Some(&token), None).await;
    assert_eq!(body["result"], "already_processed");

    assert_eq!(h.db.get_user_now(&user_id).unwrap().balance_kobo, 250_000);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_verify_someone_elses_deposit() {
    let h = harness();
    let (_, ada) = signup(&h.router, "ada@example.com").await;
    let (_, eve) = signup(&h.router, "eve@example.com").await;

    let (_, body) = call(
        &h.router,
        "POST",
        "/deposits",
        Some(&ada),
        Some(json!({ "provider": "crypto", "amount_kobo": 250_000 })),
    )
    .await;
    let reference = body["deposit"]["reference"].as_str().unwrap();

    let (status, _) = call(
        &h.router,
        "POST",
        &format!("/deposits/{}/verify", reference),
        Some(&eve),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deposit_below_minimum() {
    let h = harness();
    let (_, token) = signup(&h.router, "ada@example.com").await;

    let (status, body) = call(
        &h.router,
        "POST",
        "/deposits",
        Some(&token),
        Some(json!({ "provider": "bank_transfer", "amount_kobo": 5_000 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "validation_error");
    assert!(h.bank.checkouts().is_empty());
}

#[tokio::test]
async fn test_manual_payment_rejection_flow() {
    let h = harness();
    let (_, token) = signup(&h.router, "ada@example.com").await;

    let (_, body) = call(
        &h.router,
        "POST",
        "/manual-payments",
        Some(&token),
        Some(json!({
            "amount_kobo": 200_000,
            "receipt_url": "https://files.example.com/r.png",
            "sender_name": "Ada Obi",
            "note": "Sent from GTBank"
        })),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &h.router,
        "POST",
        &format!("/admin/manual-payments/{}/reject", id),
        None,
        Some(json!({ "note": "Receipt is unreadable" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["review_note"], "Receipt is unreadable");

    let (_, mine) = call(&h.router, "GET", "/manual-payments", Some(&token), None).await;
    assert_eq!(mine["items"][0]["status"], "rejected");

    let (_, me) = call(&h.router, "GET", "/me", Some(&token), None).await;
    assert_eq!(me["balance_kobo"], 0);
}

#[tokio::test]
async fn test_admin_lists_users_and_refund_requests() {
    let h = harness();
    signup(&h.router, "ada@example.com").await;
    signup(&h.router, "eve@example.com").await;

    let (status, users) = call(&h.router, "GET", "/admin/users?limit=1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users["items"].as_array().unwrap().len(), 1);
    assert_eq!(users["items"][0]["email"], "eve@example.com");
    assert_eq!(users["has_more"], true);

    let (status, requests) = call(
        &h.router,
        "GET",
        "/admin/refund-requests?status=pending",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(requests["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_adjust_balance_cannot_overdraw() {
    let h = harness();
    let (user_id, _) = signup(&h.router, "ada@example.com").await;

    let (status, body) = call(
        &h.router,
        "POST",
        &format!("/admin/users/{}/adjust", user_id),
        None,
        Some(json!({ "amount_kobo": -10_000, "reason": "Chargeback" })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["type"], "insufficient_funds");

    let (status, _) = call(
        &h.router,
        "POST",
        "/admin/users/missing/adjust",
        None,
        Some(json!({ "amount_kobo": 10_000, "reason": "Goodwill" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_adjust_balance_rejects_extreme_amounts() {
    let h = harness();
    let (user_id, _) = signup(&h.router, "ada@example.com").await;
    let uri = format!("/admin/users/{}/adjust", user_id);

    for amount in [i64::MIN, i64::MAX] {
        let (status, body) = call(
            &h.router,
            "POST",
            &uri,
            None,
            Some(json!({ "amount_kobo": amount, "reason": "Typo" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "validation_error");
    }

    assert_eq!(h.db.get_user_now(&user_id).unwrap().balance_kobo, 0);
    assert!(h.db.transactions_for(&user_id).is_empty());
}
