//! 5sim-compatible SMS activation provider.
//!
//! Numbers are bought per service and country, polled for incoming SMS, and
//! then either finished or cancelled on the provider side.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    AppError, ExternalServiceError, ProviderActivation, ProviderOffer, SmsProvider, SmsStatus,
};

/// Default provider API base URL
pub const DEFAULT_SMS_API_URL: &str = "https://5sim.net/v1";

/// Per-operator price entry from `/guest/prices`
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OperatorPrice {
    pub cost: f64,
    #[serde(default)]
    pub count: i64,
}

/// `country -> product -> operator -> price`
pub type PriceTable = HashMap<String, HashMap<String, HashMap<String, OperatorPrice>>>;

/// Order returned by `/user/buy/activation`
#[derive(Debug, Deserialize)]
pub struct ActivationOrder {
    pub id: i64,
    pub phone: String,
    #[serde(default)]
    pub operator: Option<String>,
}

/// A received message on an order
#[derive(Debug, Deserialize, Clone)]
pub struct OrderSms {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Order state returned by `/user/check/{id}`
#[derive(Debug, Deserialize)]
pub struct OrderCheck {
    pub status: String,
    #[serde(default)]
    pub sms: Option<Vec<OrderSms>>,
}

/// SMS provider speaking the 5sim REST API
#[derive(Debug, Clone)]
pub struct FiveSimProvider {
    http_client: Client,
    api_key: Option<SecretString>,
    base_url: String,
}

impl FiveSimProvider {
    /// Create a new provider
    ///
    /// # Arguments
    /// * `api_key` - Bearer token. If None, runs in mock mode.
    /// * `base_url` - Optional custom API base URL.
    pub fn new(api_key: Option<SecretString>, base_url: Option<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_SMS_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    /// Check if running in mock mode (no API key configured)
    pub fn is_mock_mode(&self) -> bool {
        self.api_key.is_none()
    }

    fn bearer(&self) -> Result<String, AppError> {
        self.api_key
            .as_ref()
            .map(|key| format!("Bearer {}", key.expose_secret()))
            .ok_or_else(|| {
                AppError::ExternalService(ExternalServiceError::Configuration(
                    "SMS_API_KEY not configured".to_string(),
                ))
            })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Calling SMS provider");

        let mut request = self.http_client.get(&url).query(query);
        if authenticated {
            request = request.header("Authorization", self.bearer()?);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, "SMS provider request failed");
            AppError::ExternalService(ExternalServiceError::from(e))
        })?;

        Self::read_json(response).await
    }

    /// The provider answers some business errors with a plain-text 200 body
    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, AppError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AppError::ExternalService(ExternalServiceError::Network(e.to_string()))
        })?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::ExternalService(ExternalServiceError::RateLimited(
                "SMS provider rate limit".to_string(),
            )));
        }
        if !status.is_success() {
            error!(status = %status, body = %body, "SMS provider returned error");
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        serde_json::from_str(&body).map_err(|e| {
            let trimmed = body.trim();
            match trimmed {
                "no free phones" | "not enough product qty" => AppError::ExternalService(
                    ExternalServiceError::Unavailable("No numbers available".to_string()),
                ),
                "not enough user balance" => AppError::ExternalService(
                    ExternalServiceError::Unavailable("Provider balance exhausted".to_string()),
                ),
                _ => {
                    error!(error = %e, body = %trimmed, "Failed to parse SMS provider response");
                    AppError::ExternalService(ExternalServiceError::ParseError(e.to_string()))
                }
            }
        })
    }

    /// Cheapest operator with stock for `service` in `country`
    pub fn cheapest_offer(table: &PriceTable, service: &str, country: &str) -> Option<ProviderOffer> {
        table
            .get(country)?
            .get(service)?
            .values()
            .filter(|p| p.count > 0 && p.cost.is_finite() && p.cost > 0.0)
            .min_by(|a, b| a.cost.total_cmp(&b.cost))
            .map(|p| ProviderOffer {
                cost: p.cost,
                count: p.count,
            })
    }

    /// Map a provider order check onto our SMS status
    pub fn interpret_check(check: &OrderCheck) -> SmsStatus {
        let latest = check
            .sms
            .as_ref()
            .and_then(|messages| messages.iter().rev().find(|m| m.code.is_some()));
        if let Some(sms) = latest {
            return SmsStatus::Received {
                code: sms.code.clone().unwrap_or_default(),
                text: sms.text.clone(),
            };
        }

        match check.status.as_str() {
            "CANCELED" | "TIMEOUT" | "BANNED" | "FINISHED" => SmsStatus::Closed,
            _ => SmsStatus::Waiting,
        }
    }
}

#[async_trait]
impl SmsProvider for FiveSimProvider {
    fn name(&self) -> &'static str {
        "sms_provider"
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        if self.is_mock_mode() {
            return Ok(());
        }
        let _: serde_json::Value = self.get("/user/profile", &[], true).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_offer(
        &self,
        service: &str,
        country: &str,
    ) -> Result<Option<ProviderOffer>, AppError> {
        if self.is_mock_mode() {
            warn!("Running in mock SMS mode - no SMS_API_KEY configured");
            return Ok(Some(ProviderOffer {
                cost: 15.0,
                count: 100,
            }));
        }

        let table: PriceTable = self
            .get(
                "/guest/prices",
                &[("country", country), ("product", service)],
                false,
            )
            .await?;
        Ok(Self::cheapest_offer(&table, service, country))
    }

    #[instrument(skip(self))]
    async fn purchase_number(
        &self,
        service: &str,
        country: &str,
    ) -> Result<ProviderActivation, AppError> {
        if self.is_mock_mode() {
            return Ok(ProviderActivation {
                activation_id: format!("mock-{}", Uuid::new_v4().simple()),
                phone_number: "+2348000000000".to_string(),
            });
        }

        let order: ActivationOrder = self
            .get(
                &format!("/user/buy/activation/{}/any/{}", country, service),
                &[],
                true,
            )
            .await?;

        info!(
            activation_id = %order.id,
            operator = ?order.operator,
            "Number purchased"
        );

        Ok(ProviderActivation {
            activation_id: order.id.to_string(),
            phone_number: order.phone,
        })
    }

    #[instrument(skip(self))]
    async fn check_sms(&self, activation_id: &str) -> Result<SmsStatus, AppError> {
        if self.is_mock_mode() {
            return Ok(SmsStatus::Received {
                code: "123456".to_string(),
                text: Some("Your verification code is 123456".to_string()),
            });
        }

        let check: OrderCheck = self
            .get(&format!("/user/check/{}", activation_id), &[], true)
            .await?;
        Ok(Self::interpret_check(&check))
    }

    #[instrument(skip(self))]
    async fn cancel_activation(&self, activation_id: &str) -> Result<(), AppError> {
        if self.is_mock_mode() {
            return Ok(());
        }
        let _: serde_json::Value = self
            .get(&format!("/user/cancel/{}", activation_id), &[], true)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn finish_activation(&self, activation_id: &str) -> Result<(), AppError> {
        if self.is_mock_mode() {
            return Ok(());
        }
        let _: serde_json::Value = self
            .get(&format!("/user/finish/{}", activation_id), &[], true)
            .await?;
        Ok(())
    }
}
