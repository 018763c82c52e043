//! Transactional email over an HTTP API (Resend-compatible).

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::domain::{AppError, EmailMessage, ExternalServiceError, Notifier};

/// Default email API base URL
pub const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com";

/// Default sender
pub const DEFAULT_EMAIL_FROM: &str = "InstantNums <noreply@instantnums.com>";

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Email notifier. Without an API key, messages are only logged.
#[derive(Debug, Clone)]
pub struct ResendNotifier {
    http_client: Client,
    api_key: Option<SecretString>,
    base_url: String,
    from: String,
}

impl ResendNotifier {
    pub fn new(api_key: Option<SecretString>, base_url: Option<String>, from: Option<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_EMAIL_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            from: from.unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string()),
        }
    }

    pub fn is_mock_mode(&self) -> bool {
        self.api_key.is_none()
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    #[instrument(skip(self, message), fields(to = %message.to, subject = %message.subject))]
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        let Some(api_key) = &self.api_key else {
            info!("Mock email mode - message not delivered");
            return Ok(());
        };

        let response = self
            .http_client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .json(&SendEmailRequest {
                from: &self.from,
                to: [&message.to],
                subject: &message.subject,
                html: &message.html,
            })
            .send()
            .await
            .map_err(|e| AppError::ExternalService(ExternalServiceError::from(e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Email API returned error");
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        info!("Email sent");
        Ok(())
    }
}
