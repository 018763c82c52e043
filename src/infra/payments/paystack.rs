//! Bank transfer aggregator (Paystack-compatible API).
//!
//! Checkout sessions are opened with `/transaction/initialize`; settlement is
//! reported through `charge.*` webhooks signed with the secret key, and can be
//! re-checked with `/transaction/verify/{reference}`.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::signature;
use crate::domain::{
    AppError, CheckoutRequest, CheckoutSession, Deposit, ExternalServiceError, GatewayEvent,
    GatewayOutcome, PaymentGateway, PaymentProvider,
};

/// Default API base URL
pub const DEFAULT_BANK_GATEWAY_URL: &str = "https://api.paystack.co";

/// Webhook signature header
pub const BANK_SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    email: &'a str,
    amount: i64,
    reference: &'a str,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    #[serde(default)]
    access_code: Option<String>,
}

/// Transaction object shared by webhooks and verification
#[derive(Debug, Deserialize)]
pub struct TransactionData {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub reference: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub gateway_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    event: String,
    data: TransactionData,
}

/// Bank transfer gateway client
#[derive(Debug, Clone)]
pub struct PaystackGateway {
    http_client: Client,
    secret_key: Option<SecretString>,
    base_url: String,
}

impl PaystackGateway {
    /// Create a new gateway
    ///
    /// # Arguments
    /// * `secret_key` - Secret key used for API calls and webhook signatures.
    ///   If None, runs in mock mode.
    /// * `base_url` - Optional custom API base URL.
    pub fn new(secret_key: Option<SecretString>, base_url: Option<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            secret_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BANK_GATEWAY_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn is_mock_mode(&self) -> bool {
        self.secret_key.is_none()
    }

    fn bearer(&self) -> Result<String, AppError> {
        self.secret_key
            .as_ref()
            .map(|key| format!("Bearer {}", key.expose_secret()))
            .ok_or_else(|| {
                AppError::ExternalService(ExternalServiceError::Configuration(
                    "BANK_GATEWAY_SECRET not configured".to_string(),
                ))
            })
    }

    async fn read_envelope<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Bank gateway returned error");
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse bank gateway response");
            AppError::ExternalService(ExternalServiceError::ParseError(e.to_string()))
        })?;

        match (envelope.status, envelope.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: 200,
                message: envelope
                    .message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            })),
        }
    }

    fn provider_reference(data: &TransactionData) -> Option<String> {
        data.id.as_ref().map(|id| match id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Map a transaction status from the verify endpoint
    pub fn outcome_for_status(data: &TransactionData) -> GatewayOutcome {
        match data.status.as_deref() {
            Some("success") => GatewayOutcome::Succeeded {
                amount_kobo: data.amount,
            },
            Some(status @ ("failed" | "reversed")) => GatewayOutcome::Failed {
                reason: data
                    .gateway_response
                    .clone()
                    .unwrap_or_else(|| format!("Transaction {}", status)),
            },
            _ => GatewayOutcome::Pending,
        }
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::BankTransfer
    }

    fn signature_header(&self) -> &'static str {
        BANK_SIGNATURE_HEADER
    }

    #[instrument(skip(self, request), fields(reference = %request.reference, amount = %request.amount_kobo))]
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, AppError> {
        if self.is_mock_mode() {
            warn!("Running in mock bank gateway mode - no BANK_GATEWAY_SECRET configured");
            return Ok(CheckoutSession {
                checkout_url: format!("https://checkout.mock.local/bank/{}", request.reference),
                provider_reference: None,
            });
        }

        let url = format!("{}/transaction/initialize", self.base_url);
        debug!(url = %url, "Initializing bank transfer checkout");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.bearer()?)
            .json(&InitializeRequest {
                email: &request.email,
                amount: request.amount_kobo,
                reference: &request.reference,
                callback_url: &request.callback_url,
            })
            .send()
            .await
            .map_err(|e| AppError::ExternalService(ExternalServiceError::from(e)))?;

        let data: InitializeData = Self::read_envelope(response).await?;
        info!(reference = %request.reference, "Bank checkout created");

        Ok(CheckoutSession {
            checkout_url: data.authorization_url,
            provider_reference: data.access_code,
        })
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        match &self.secret_key {
            Some(secret) => {
                signature::verify_hex(secret.expose_secret().as_bytes(), payload, signature)
            }
            None => {
                warn!("Bank webhook rejected: no BANK_GATEWAY_SECRET configured");
                false
            }
        }
    }

    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent, AppError> {
        let body: WebhookBody = serde_json::from_slice(payload)
            .map_err(|e| AppError::Deserialization(format!("Invalid bank webhook: {}", e)))?;

        let outcome = match body.event.as_str() {
            "charge.success" => GatewayOutcome::Succeeded {
                amount_kobo: body.data.amount,
            },
            "charge.failed" => GatewayOutcome::Failed {
                reason: body
                    .data
                    .gateway_response
                    .clone()
                    .unwrap_or_else(|| "Charge failed".to_string()),
            },
            _ => GatewayOutcome::Ignored,
        };

        Ok(GatewayEvent {
            provider_reference: Self::provider_reference(&body.data),
            reference: body.data.reference,
            outcome,
        })
    }

    #[instrument(skip(self, deposit), fields(reference = %deposit.reference))]
    async fn fetch_status(&self, deposit: &Deposit) -> Result<GatewayEvent, AppError> {
        if self.is_mock_mode() {
            return Ok(GatewayEvent {
                reference: deposit.reference.clone(),
                provider_reference: None,
                outcome: GatewayOutcome::Pending,
            });
        }

        let url = format!("{}/transaction/verify/{}", self.base_url, deposit.reference);
        let response = self
            .http_client
            .get(&url)
            .header("Authorization", self.bearer()?)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(ExternalServiceError::from(e)))?;

        let data: TransactionData = Self::read_envelope(response).await?;
        Ok(GatewayEvent {
            provider_reference: Self::provider_reference(&data),
            outcome: Self::outcome_for_status(&data),
            reference: data.reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn gateway() -> PaystackGateway {
        PaystackGateway::new(Some(SecretString::from("sk_test_secret")), None)
    }

    #[test]
    fn test_parse_charge_success() {
        let body = br#"{"event":"charge.success","data":{"id":302961,"reference":"INS-ABC","amount":500000,"status":"success"}}"#;
        let event = gateway().parse_event(body).unwrap();
        assert_eq!(event.reference, "INS-ABC");
        assert_eq!(event.provider_reference.as_deref(), Some("302961"));
        assert_eq!(
            event.outcome,
            GatewayOutcome::Succeeded {
                amount_kobo: Some(500_000)
            }
        );
    }

    #[test]
    fn test_parse_other_events() {
        let failed = br#"{"event":"charge.failed","data":{"reference":"INS-1","gateway_response":"Declined"}}"#;
        assert_eq!(
            gateway().parse_event(failed).unwrap().outcome,
            GatewayOutcome::Failed {
                reason: "Declined".to_string()
            }
        );

        let transfer = br#"{"event":"transfer.success","data":{"reference":"TRF-1"}}"#;
        assert_eq!(
            gateway().parse_event(transfer).unwrap().outcome,
            GatewayOutcome::Ignored
        );

        assert!(gateway().parse_event(b"not json").is_err());
    }

    #[test]
    fn test_signature_over_raw_body() {
        let body = br#"{"event":"charge.success","data":{"reference":"INS-1"}}"#;
        let signature = signature::sign_hex(b"sk_test_secret", body);
        assert!(gateway().verify_signature(body, &signature));
        assert!(!gateway().verify_signature(b"{}", &signature));
    }

    #[test]
    fn test_mock_mode_rejects_webhooks() {
        let gateway = PaystackGateway::new(None, None);
        let signature = signature::sign_hex(b"anything", b"{}");
        assert!(!gateway.verify_signature(b"{}", &signature));
    }

    #[test]
    fn test_outcome_for_status() {
        let data = |status: &str| TransactionData {
            id: None,
            reference: "INS-1".to_string(),
            amount: Some(100_000),
            status: Some(status.to_string()),
            gateway_response: None,
        };
        assert_eq!(
            PaystackGateway::outcome_for_status(&data("success")),
            GatewayOutcome::Succeeded {
                amount_kobo: Some(100_000)
            }
        );
        assert!(matches!(
            PaystackGateway::outcome_for_status(&data("failed")),
            GatewayOutcome::Failed { .. }
        ));
        // Checkout opened but not paid yet; the customer can still complete it
        assert_eq!(
            PaystackGateway::outcome_for_status(&data("abandoned")),
            GatewayOutcome::Pending
        );
        assert_eq!(
            PaystackGateway::outcome_for_status(&data("ongoing")),
            GatewayOutcome::Pending
        );
    }
}
