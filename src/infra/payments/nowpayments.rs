//! Crypto payment gateway (NOWPayments-compatible API).
//!
//! Deposits are priced in USD invoices. Instant payment notifications (IPN)
//! are signed over the body re-serialised with sorted keys.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::signature;
use crate::domain::{
    AppError, CheckoutRequest, CheckoutSession, ExternalServiceError, GatewayEvent,
    GatewayOutcome, PaymentGateway, PaymentProvider,
};

/// Default API base URL
pub const DEFAULT_CRYPTO_GATEWAY_URL: &str = "https://api.nowpayments.io/v1";

/// IPN signature header
pub const CRYPTO_SIGNATURE_HEADER: &str = "x-nowpayments-sig";

/// Crypto gateway settings
#[derive(Debug, Clone)]
pub struct CryptoGatewayConfig {
    pub api_key: Option<SecretString>,
    pub ipn_secret: Option<SecretString>,
    pub base_url: Option<String>,
    /// NGN per USD used to price invoices
    pub usd_to_ngn_rate: f64,
    /// Where the gateway posts payment notifications
    pub ipn_callback_url: Option<String>,
}

impl Default for CryptoGatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            ipn_secret: None,
            base_url: None,
            usd_to_ngn_rate: 1600.0,
            ipn_callback_url: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct InvoiceRequest<'a> {
    price_amount: f64,
    price_currency: &'a str,
    order_id: &'a str,
    order_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipn_callback_url: Option<&'a str>,
    success_url: &'a str,
    cancel_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    id: serde_json::Value,
    invoice_url: String,
}

/// Payment notification body
#[derive(Debug, Deserialize)]
pub struct IpnPayload {
    #[serde(default)]
    pub payment_id: Option<serde_json::Value>,
    pub payment_status: String,
    #[serde(default)]
    pub order_id: Option<String>,
}

/// Crypto invoice gateway client
#[derive(Debug, Clone)]
pub struct NowPaymentsGateway {
    http_client: Client,
    config: CryptoGatewayConfig,
    base_url: String,
}

impl NowPaymentsGateway {
    pub fn new(config: CryptoGatewayConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_CRYPTO_GATEWAY_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            http_client,
            config,
            base_url,
        }
    }

    pub fn is_mock_mode(&self) -> bool {
        self.config.api_key.is_none()
    }

    /// Convert kobo to a USD invoice amount, rounded up to the cent
    #[must_use]
    pub fn usd_amount(&self, amount_kobo: i64) -> f64 {
        let cents = (amount_kobo as f64 / self.config.usd_to_ngn_rate - 1e-9).ceil();
        cents / 100.0
    }

    /// Map an IPN payment status onto a gateway outcome
    pub fn outcome_for_status(status: &str) -> GatewayOutcome {
        match status {
            "finished" => GatewayOutcome::Succeeded { amount_kobo: None },
            "failed" | "expired" | "refunded" => GatewayOutcome::Failed {
                reason: format!("Crypto payment {}", status),
            },
            "waiting" | "confirming" | "confirmed" | "sending" | "partially_paid" => {
                GatewayOutcome::Pending
            }
            _ => GatewayOutcome::Ignored,
        }
    }
}

#[async_trait]
impl PaymentGateway for NowPaymentsGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Crypto
    }

    fn signature_header(&self) -> &'static str {
        CRYPTO_SIGNATURE_HEADER
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        if self.is_mock_mode() {
            return Ok(());
        }
        let response = self
            .http_client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .map_err(|e| AppError::ExternalService(ExternalServiceError::from(e)))?;
        if !response.status().is_success() {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                format!("Crypto gateway status {}", response.status()),
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(reference = %request.reference, amount = %request.amount_kobo))]
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, AppError> {
        let price_amount = self.usd_amount(request.amount_kobo);

        let Some(api_key) = &self.config.api_key else {
            warn!("Running in mock crypto gateway mode - no CRYPTO_GATEWAY_API_KEY configured");
            return Ok(CheckoutSession {
                checkout_url: format!("https://checkout.mock.local/crypto/{}", request.reference),
                provider_reference: None,
            });
        };

        let url = format!("{}/invoice", self.base_url);
        debug!(url = %url, price_amount = %price_amount, "Creating crypto invoice");

        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", api_key.expose_secret())
            .json(&InvoiceRequest {
                price_amount,
                price_currency: "usd",
                order_id: &request.reference,
                order_description: format!("Wallet funding {}", request.reference),
                ipn_callback_url: self.config.ipn_callback_url.as_deref(),
                success_url: &request.callback_url,
                cancel_url: &request.callback_url,
            })
            .send()
            .await
            .map_err(|e| AppError::ExternalService(ExternalServiceError::from(e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Crypto gateway returned error");
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        let invoice: InvoiceResponse = response.json().await.map_err(|e| {
            AppError::ExternalService(ExternalServiceError::ParseError(e.to_string()))
        })?;

        let invoice_id = match invoice.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        info!(reference = %request.reference, invoice_id = %invoice_id, "Crypto invoice created");

        Ok(CheckoutSession {
            checkout_url: invoice.invoice_url,
            provider_reference: Some(invoice_id),
        })
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        let Some(secret) = &self.config.ipn_secret else {
            warn!("Crypto IPN rejected: no CRYPTO_GATEWAY_IPN_SECRET configured");
            return false;
        };
        match signature::canonical_json(payload) {
            Ok(canonical) => signature::verify_hex(
                secret.expose_secret().as_bytes(),
                canonical.as_bytes(),
                signature,
            ),
            Err(e) => {
                warn!(error = %e, "Crypto IPN body is not valid JSON");
                false
            }
        }
    }

    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent, AppError> {
        let body: IpnPayload = serde_json::from_slice(payload)
            .map_err(|e| AppError::Deserialization(format!("Invalid crypto IPN: {}", e)))?;

        let reference = body.order_id.ok_or_else(|| {
            AppError::Deserialization("Crypto IPN is missing order_id".to_string())
        })?;

        Ok(GatewayEvent {
            reference,
            provider_reference: body.payment_id.map(|id| match id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            outcome: Self::outcome_for_status(&body.payment_status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> NowPaymentsGateway {
        NowPaymentsGateway::new(CryptoGatewayConfig {
            api_key: Some(SecretString::from("np_key")),
            ipn_secret: Some(SecretString::from("ipn_secret")),
            ..Default::default()
        })
    }

    #[test]
    fn test_usd_amount_rounds_up_to_cent() {
        let gateway = gateway();
        // ₦16,000 at 1600/USD
        assert_eq!(gateway.usd_amount(1_600_000), 10.0);
        // ₦1,000 = 0.625 USD -> 0.63
        assert_eq!(gateway.usd_amount(100_000), 0.63);
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(
            NowPaymentsGateway::outcome_for_status("finished"),
            GatewayOutcome::Succeeded { amount_kobo: None }
        );
        assert_eq!(
            NowPaymentsGateway::outcome_for_status("confirming"),
            GatewayOutcome::Pending
        );
        assert!(matches!(
            NowPaymentsGateway::outcome_for_status("expired"),
            GatewayOutcome::Failed { .. }
        ));
        assert_eq!(
            NowPaymentsGateway::outcome_for_status("something_new"),
            GatewayOutcome::Ignored
        );
    }

    #[test]
    fn test_signature_uses_sorted_keys() {
        let body = br#"{"payment_status":"finished","order_id":"INS-1","payment_id":5077125051}"#;
        let sorted = br#"{"order_id":"INS-1","payment_id":5077125051,"payment_status":"finished"}"#;
        let signature = signature::sign_hex(b"ipn_secret", sorted);

        assert!(gateway().verify_signature(body, &signature));

        let raw_signature = signature::sign_hex(b"ipn_secret", body);
        assert!(!gateway().verify_signature(body, &raw_signature));
    }

    #[test]
    fn test_parse_event() {
        let body = br#"{"payment_id":5077125051,"payment_status":"finished","order_id":"INS-1"}"#;
        let event = gateway().parse_event(body).unwrap();
        assert_eq!(event.reference, "INS-1");
        assert_eq!(event.provider_reference.as_deref(), Some("5077125051"));

        let missing = br#"{"payment_id":1,"payment_status":"finished"}"#;
        assert!(gateway().parse_event(missing).is_err());
    }
}
