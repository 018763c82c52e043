//! Wallet funding: gateway deposits, webhooks and manual payments.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::domain::{
    AppError, CheckoutRequest, CreditOutcome, CreditReceipt, DatabaseClient, DatabaseError,
    Deposit, DepositStatus, EmailMessage, GatewayEvent, GatewayOutcome, InitiateDepositRequest,
    InitiateDepositResponse, ManualPayment, ManualPaymentStatus, NewDeposit, NewManualPayment,
    Notifier, PaginatedResponse, PaymentGateway, PaymentProvider, PaymentUpdate,
    PaymentUpdateResponse, RewardsConfig, SubmitManualPaymentRequest, User, ValidationError,
};

/// Reviewer recorded for admin-key decisions
pub const ADMIN_REVIEWER: &str = "admin";

/// Deposit rules and URLs
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Smallest accepted deposit or manual payment, in kobo
    pub min_deposit_kobo: i64,
    /// Public origin used to build checkout return URLs
    pub public_base_url: String,
    /// Recipient of manual payment notifications
    pub admin_email: Option<String>,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            min_deposit_kobo: 100_000,
            public_base_url: "http://localhost:3000".to_string(),
            admin_email: None,
        }
    }
}

impl PaymentConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        use std::env;

        let defaults = Self::default();
        Self {
            min_deposit_kobo: env::var("MIN_DEPOSIT_KOBO")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.min_deposit_kobo),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
            admin_email: env::var("ADMIN_EMAIL").ok().filter(|v| !v.is_empty()),
        }
    }

    /// Where the gateway sends the customer after checkout
    #[must_use]
    pub fn callback_url(&self, reference: &str) -> String {
        format!("{}/wallet?reference={}", self.public_base_url, reference)
    }
}

/// Payment service for deposits, gateway notifications and manual payments
pub struct PaymentService {
    db_client: Arc<dyn DatabaseClient>,
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
    notifier: Arc<dyn Notifier>,
    rewards: RewardsConfig,
    config: PaymentConfig,
}

impl PaymentService {
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        gateways: Vec<Arc<dyn PaymentGateway>>,
        notifier: Arc<dyn Notifier>,
        rewards: RewardsConfig,
        config: PaymentConfig,
    ) -> Self {
        let gateways = gateways
            .into_iter()
            .map(|gateway| (gateway.provider(), gateway))
            .collect();
        Self {
            db_client,
            gateways,
            notifier,
            rewards,
            config,
        }
    }

    fn gateway(&self, provider: PaymentProvider) -> Result<&Arc<dyn PaymentGateway>, AppError> {
        self.gateways.get(&provider).ok_or_else(|| {
            AppError::NotSupported(format!("No gateway configured for {}", provider))
        })
    }

    fn check_minimum(&self, amount_kobo: i64) -> Result<(), AppError> {
        if amount_kobo < self.config.min_deposit_kobo {
            return Err(AppError::Validation(ValidationError::invalid(
                "amount_kobo",
                format!(
                    "Minimum amount is {} kobo",
                    self.config.min_deposit_kobo
                ),
            )));
        }
        Ok(())
    }

    /// Create a pending deposit and open a gateway checkout for it
    #[instrument(skip(self, user, request), fields(user_id = %user.id, provider = %request.provider))]
    pub async fn initiate_deposit(
        &self,
        user: &User,
        request: &InitiateDepositRequest,
    ) -> Result<InitiateDepositResponse, AppError> {
        request.validate()?;
        if request.provider == PaymentProvider::Manual {
            return Err(AppError::Validation(ValidationError::invalid(
                "provider",
                "Manual payments are submitted through /manual-payments",
            )));
        }
        self.check_minimum(request.amount_kobo)?;
        let gateway = Arc::clone(self.gateway(request.provider)?);

        let mut deposit = self
            .db_client
            .create_deposit(&NewDeposit::new(
                user.id.clone(),
                request.provider,
                request.amount_kobo,
            ))
            .await?;

        let checkout = CheckoutRequest {
            reference: deposit.reference.clone(),
            amount_kobo: deposit.amount_kobo,
            email: user.email.clone(),
            callback_url: self.config.callback_url(&deposit.reference),
        };

        let session = match gateway.create_checkout(&checkout).await {
            Ok(session) => session,
            Err(e) => {
                error!(reference = %deposit.reference, error = %e, "Checkout creation failed");
                if let Err(mark_err) = self
                    .db_client
                    .fail_deposit(&deposit.reference, &e.to_string())
                    .await
                {
                    error!(error = %mark_err, "Failed to mark deposit as failed");
                }
                return Err(e);
            }
        };

        self.db_client
            .attach_checkout(
                &deposit.reference,
                &session.checkout_url,
                session.provider_reference.as_deref(),
            )
            .await?;
        deposit.checkout_url = Some(session.checkout_url.clone());
        deposit.provider_reference = session.provider_reference;

        info!(reference = %deposit.reference, amount = %deposit.amount_kobo, "Deposit initiated");
        Ok(InitiateDepositResponse {
            deposit,
            checkout_url: session.checkout_url,
        })
    }

    #[instrument(skip(self))]
    pub async fn list_deposits(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Deposit>, AppError> {
        self.db_client.list_deposits(user_id, limit, cursor).await
    }

    /// Verify, parse and apply a gateway notification
    #[instrument(skip(self, payload, signature), fields(provider = %provider, bytes = payload.len()))]
    pub async fn handle_webhook(
        &self,
        provider: PaymentProvider,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentUpdateResponse, AppError> {
        let gateway = Arc::clone(self.gateway(provider)?);

        let signature = signature.filter(|s| !s.is_empty()).ok_or_else(|| {
            warn!("Webhook received without signature");
            AppError::Authentication("Missing webhook signature".to_string())
        })?;
        if !gateway.verify_signature(payload, signature) {
            warn!("Webhook signature verification failed");
            return Err(AppError::Authentication(
                "Invalid webhook signature".to_string(),
            ));
        }

        let event = gateway.parse_event(payload)?;
        let result = self.apply_event(provider, &event).await?;
        Ok(PaymentUpdateResponse {
            reference: event.reference,
            result,
        })
    }

    /// Re-check a pending or failed deposit through the gateway's status API
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn verify_deposit(
        &self,
        user: &User,
        reference: &str,
    ) -> Result<PaymentUpdateResponse, AppError> {
        let deposit = self
            .db_client
            .get_deposit_by_reference(reference)
            .await?
            .filter(|d| d.user_id == user.id)
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(format!("Deposit {}", reference)))
            })?;

        if !matches!(deposit.status, DepositStatus::Pending | DepositStatus::Failed) {
            return Ok(PaymentUpdateResponse {
                reference: deposit.reference,
                result: PaymentUpdate::AlreadyProcessed,
            });
        }

        let gateway = Arc::clone(self.gateway(deposit.provider)?);
        let event = gateway.fetch_status(&deposit).await?;
        let result = self.apply_event(deposit.provider, &event).await?;
        Ok(PaymentUpdateResponse {
            reference: deposit.reference,
            result,
        })
    }

    /// Apply a normalised gateway outcome to our deposit
    async fn apply_event(
        &self,
        provider: PaymentProvider,
        event: &GatewayEvent,
    ) -> Result<PaymentUpdate, AppError> {
        let Some(deposit) = self
            .db_client
            .get_deposit_by_reference(&event.reference)
            .await?
        else {
            warn!(reference = %event.reference, "Gateway event for unknown reference");
            return Ok(PaymentUpdate::UnknownReference);
        };

        if deposit.provider != provider {
            warn!(
                reference = %event.reference,
                expected = %deposit.provider,
                received = %provider,
                "Gateway event from the wrong provider"
            );
            return Ok(PaymentUpdate::UnknownReference);
        }

        match &event.outcome {
            GatewayOutcome::Succeeded { amount_kobo } => {
                let amount = amount_kobo.unwrap_or(deposit.amount_kobo);
                if amount <= 0 {
                    warn!(reference = %event.reference, amount = %amount, "Ignoring non-positive credit");
                    return Ok(PaymentUpdate::Ignored);
                }
                if amount != deposit.amount_kobo {
                    warn!(
                        reference = %event.reference,
                        requested = %deposit.amount_kobo,
                        paid = %amount,
                        "Paid amount differs from requested amount"
                    );
                }

                let outcome = self
                    .db_client
                    .complete_deposit(
                        &event.reference,
                        amount,
                        event.provider_reference.as_deref(),
                        &self.rewards,
                    )
                    .await?;

                match outcome {
                    CreditOutcome::Credited(receipt) => {
                        info!(
                            reference = %event.reference,
                            user_id = %receipt.user_id,
                            amount = %receipt.amount_kobo,
                            "Deposit credited"
                        );
                        self.notify_credit(&receipt, NotificationKind::Deposit).await;
                        Ok(PaymentUpdate::Credited)
                    }
                    CreditOutcome::AlreadyProcessed => {
                        info!(reference = %event.reference, "Deposit already processed");
                        Ok(PaymentUpdate::AlreadyProcessed)
                    }
                }
            }
            GatewayOutcome::Failed { reason } => {
                if self.db_client.fail_deposit(&event.reference, reason).await? {
                    info!(reference = %event.reference, reason = %reason, "Deposit marked failed");
                    Ok(PaymentUpdate::MarkedFailed)
                } else {
                    Ok(PaymentUpdate::AlreadyProcessed)
                }
            }
            GatewayOutcome::Pending => Ok(PaymentUpdate::StillPending),
            GatewayOutcome::Ignored => Ok(PaymentUpdate::Ignored),
        }
    }

    /// Record a manual payment claim and alert the admin
    #[instrument(skip(self, user, request), fields(user_id = %user.id, amount = %request.amount_kobo))]
    pub async fn submit_manual_payment(
        &self,
        user: &User,
        request: &SubmitManualPaymentRequest,
    ) -> Result<ManualPayment, AppError> {
        request.validate()?;
        self.check_minimum(request.amount_kobo)?;

        let payment = self
            .db_client
            .create_manual_payment(&NewManualPayment {
                user_id: user.id.clone(),
                amount_kobo: request.amount_kobo,
                receipt_url: request.receipt_url.trim().to_string(),
                sender_name: request.sender_name.trim().to_string(),
                note: request
                    .note
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
            })
            .await?;

        info!(payment_id = %payment.id, "Manual payment submitted");

        match &self.config.admin_email {
            Some(admin) => {
                self.notify(EmailMessage::manual_payment_submitted(admin, &payment))
                    .await
            }
            None => warn!("ADMIN_EMAIL not configured, manual payment alert skipped"),
        }

        Ok(payment)
    }

    #[instrument(skip(self))]
    pub async fn list_manual_payments(
        &self,
        user_id: Option<&str>,
        status: Option<ManualPaymentStatus>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<ManualPayment>, AppError> {
        self.db_client
            .list_manual_payments(user_id, status, limit, cursor)
            .await
    }

    async fn load_manual_payment(&self, id: &str) -> Result<ManualPayment, AppError> {
        self.db_client
            .get_manual_payment(id)
            .await?
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(format!("Manual payment {}", id)))
            })
    }

    /// Approve a pending claim and credit the wallet
    #[instrument(skip(self, note))]
    pub async fn approve_manual_payment(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
    ) -> Result<ManualPayment, AppError> {
        let payment = self.load_manual_payment(id).await?;

        match self
            .db_client
            .approve_manual_payment(id, reviewer, note, &self.rewards)
            .await?
        {
            CreditOutcome::Credited(receipt) => {
                info!(payment_id = %id, amount = %receipt.amount_kobo, "Manual payment approved");
                self.notify_credit(&receipt, NotificationKind::ManualApproval)
                    .await;
            }
            CreditOutcome::AlreadyProcessed => {
                return Err(AppError::InvalidState(format!(
                    "Manual payment is already {}",
                    payment.status
                )));
            }
        }

        self.load_manual_payment(id).await
    }

    /// Reject a pending claim
    #[instrument(skip(self, note))]
    pub async fn reject_manual_payment(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
    ) -> Result<ManualPayment, AppError> {
        let payment = self.load_manual_payment(id).await?;
        let reason = note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Payment could not be verified");

        if !self
            .db_client
            .reject_manual_payment(id, reviewer, reason)
            .await?
        {
            return Err(AppError::InvalidState(format!(
                "Manual payment is already {}",
                payment.status
            )));
        }
        info!(payment_id = %id, "Manual payment rejected");

        if let Ok(Some(user)) = self.db_client.get_user(&payment.user_id).await {
            self.notify(EmailMessage::manual_payment_rejected(
                &user.email,
                &user.display_name,
                payment.amount_kobo,
                reason,
            ))
            .await;
        }

        self.load_manual_payment(id).await
    }

    /// Email the depositor and, if a referral bonus fired, the referrer
    async fn notify_credit(&self, receipt: &CreditReceipt, kind: NotificationKind) {
        match self.db_client.get_user(&receipt.user_id).await {
            Ok(Some(user)) => {
                let message = match kind {
                    NotificationKind::Deposit => EmailMessage::deposit_received(
                        &user.email,
                        &user.display_name,
                        receipt.amount_kobo,
                        receipt.balance_after_kobo,
                    ),
                    NotificationKind::ManualApproval => EmailMessage::manual_payment_approved(
                        &user.email,
                        &user.display_name,
                        receipt.amount_kobo,
                    ),
                };
                self.notify(message).await;
            }
            Ok(None) => warn!(user_id = %receipt.user_id, "Credited user not found for email"),
            Err(e) => warn!(error = %e, "Could not load user for email"),
        }

        if let Some(bonus) = &receipt.referral_bonus
            && let Ok(Some(referrer)) = self.db_client.get_user(&bonus.referrer_id).await
        {
            self.notify(EmailMessage::referral_bonus_earned(
                &referrer.email,
                &referrer.display_name,
                bonus.amount_kobo,
            ))
            .await;
        }
    }

    /// Best-effort email; failures never affect the payment
    async fn notify(&self, message: EmailMessage) {
        if let Err(e) = self.notifier.send(&message).await {
            warn!(to = %message.to, error = %e, "Failed to send email");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum NotificationKind {
    Deposit,
    ManualApproval,
}
