//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::AppError;
use super::notification::EmailMessage;
use super::payment::{
    CheckoutRequest, CheckoutSession, CreditOutcome, Deposit, GatewayEvent, ManualPayment,
    ManualPaymentStatus, NewDeposit, NewManualPayment, PaymentProvider,
};
use super::rental::{
    CreateRefundRequest, NewRental, ProviderActivation, ProviderOffer, RefundOutcome,
    RefundRequest, RefundRequestStatus, Rental, RentalStatus, SmsStatus,
};
use super::rewards::{RedemptionResult, ReferredUser, RewardsConfig};
use super::types::{
    LedgerEntry, NewUser, PaginatedResponse, SystemStats, User, WalletTransaction,
};

/// Database client trait for persistence operations.
///
/// Every method that moves money applies the balance change, the ledger row
/// and the status transition atomically.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    // ---- users -----------------------------------------------------------

    /// Insert a user. Duplicate emails fail with `DatabaseError::Duplicate`.
    async fn create_user(&self, data: &NewUser) -> Result<User, AppError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError>;

    async fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, AppError>;

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, AppError>;

    /// List users, newest first
    async fn list_users(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<User>, AppError>;

    /// Returns `false` when the user does not exist
    async fn set_user_suspended(&self, id: &str, suspended: bool) -> Result<bool, AppError>;

    /// Users who signed up with `referrer_id`'s code
    async fn list_referred_users(&self, referrer_id: &str) -> Result<Vec<ReferredUser>, AppError>;

    /// Sum of referral bonuses paid to `referrer_id`
    async fn total_referral_bonus(&self, referrer_id: &str) -> Result<i64, AppError>;

    // ---- ledger ----------------------------------------------------------

    /// Apply a signed balance change with its ledger row.
    /// Fails with `AppError::InsufficientFunds` if the balance would go negative.
    async fn apply_ledger_entry(
        &self,
        user_id: &str,
        entry: &LedgerEntry,
    ) -> Result<WalletTransaction, AppError>;

    /// Ledger rows for a user, newest first
    async fn list_wallet_transactions(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WalletTransaction>, AppError>;

    // ---- deposits --------------------------------------------------------

    async fn create_deposit(&self, data: &NewDeposit) -> Result<Deposit, AppError>;

    /// Store checkout details returned by the gateway
    async fn attach_checkout(
        &self,
        reference: &str,
        checkout_url: &str,
        provider_reference: Option<&str>,
    ) -> Result<(), AppError>;

    async fn get_deposit_by_reference(&self, reference: &str)
    -> Result<Option<Deposit>, AppError>;

    async fn list_deposits(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Deposit>, AppError>;

    /// Move a pending deposit to completed, credit the wallet and apply the
    /// referral rule. A deposit that is no longer pending yields
    /// `CreditOutcome::AlreadyProcessed`.
    async fn complete_deposit(
        &self,
        reference: &str,
        amount_kobo: i64,
        provider_reference: Option<&str>,
        rewards: &RewardsConfig,
    ) -> Result<CreditOutcome, AppError>;

    /// Mark a pending deposit failed. Returns `false` if it was not pending.
    async fn fail_deposit(&self, reference: &str, reason: &str) -> Result<bool, AppError>;

    // ---- manual payments -------------------------------------------------

    async fn create_manual_payment(
        &self,
        data: &NewManualPayment,
    ) -> Result<ManualPayment, AppError>;

    async fn get_manual_payment(&self, id: &str) -> Result<Option<ManualPayment>, AppError>;

    /// List manual payments, optionally for one user and/or one status
    async fn list_manual_payments(
        &self,
        user_id: Option<&str>,
        status: Option<ManualPaymentStatus>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<ManualPayment>, AppError>;

    /// Approve a pending manual payment and credit the wallet
    async fn approve_manual_payment(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
        rewards: &RewardsConfig,
    ) -> Result<CreditOutcome, AppError>;

    /// Returns `false` if the payment was not pending
    async fn reject_manual_payment(
        &self,
        id: &str,
        reviewer: &str,
        note: &str,
    ) -> Result<bool, AppError>;

    // ---- rentals ---------------------------------------------------------

    /// Debit the wallet and insert a `pending` rental
    async fn reserve_rental(&self, data: &NewRental) -> Result<Rental, AppError>;

    /// Attach the provider number and move the rental to `active`
    async fn activate_rental(
        &self,
        id: &str,
        activation: &ProviderActivation,
        expires_at: DateTime<Utc>,
    ) -> Result<Rental, AppError>;

    async fn get_rental(&self, id: &str) -> Result<Option<Rental>, AppError>;

    async fn list_rentals(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Rental>, AppError>;

    /// Record a received code on an active rental, add the price to the
    /// user's spend and award loyalty points. `None` if it was not active.
    async fn complete_rental(
        &self,
        id: &str,
        code: &str,
        text: Option<&str>,
        loyalty_points: i64,
    ) -> Result<Option<Rental>, AppError>;

    /// Return the rental price to the wallet once.
    ///
    /// With `final_status` set, the rental must not have received a code and
    /// moves to that status. With `None`, the status is left untouched
    /// (admin or refund-request refunds of completed rentals).
    async fn refund_rental(
        &self,
        id: &str,
        final_status: Option<RentalStatus>,
        description: &str,
    ) -> Result<RefundOutcome, AppError>;

    /// Active rentals without a code whose deadline has passed, plus
    /// pending rentals created at or before `pending_before`
    async fn get_overdue_rentals(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rental>, AppError>;

    // ---- refund requests -------------------------------------------------

    /// Fails with `DatabaseError::Duplicate` when the rental already has a
    /// pending request
    async fn create_refund_request(
        &self,
        user_id: &str,
        data: &CreateRefundRequest,
    ) -> Result<RefundRequest, AppError>;

    async fn get_refund_request(&self, id: &str) -> Result<Option<RefundRequest>, AppError>;

    async fn list_refund_requests(
        &self,
        user_id: Option<&str>,
        status: Option<RefundRequestStatus>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<RefundRequest>, AppError>;

    /// Move a pending request to `status`. Returns `false` if it was not pending.
    async fn resolve_refund_request(
        &self,
        id: &str,
        status: RefundRequestStatus,
        note: Option<&str>,
    ) -> Result<bool, AppError>;

    // ---- loyalty & reporting ---------------------------------------------

    /// Subtract points and credit their value in one step
    async fn redeem_loyalty_points(
        &self,
        user_id: &str,
        points: i64,
        credit_kobo: i64,
    ) -> Result<RedemptionResult, AppError>;

    async fn system_stats(&self) -> Result<SystemStats, AppError>;
}

/// SMS number rental provider
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Provider name for logs and health output
    fn name(&self) -> &'static str;

    /// Check provider connectivity and credentials
    async fn health_check(&self) -> Result<(), AppError>;

    /// Cheapest in-stock offer, `None` if nothing is available
    async fn get_offer(
        &self,
        service: &str,
        country: &str,
    ) -> Result<Option<ProviderOffer>, AppError>;

    /// Buy a number for `service` in `country`
    async fn purchase_number(
        &self,
        service: &str,
        country: &str,
    ) -> Result<ProviderActivation, AppError>;

    /// Poll the activation for an incoming SMS
    async fn check_sms(&self, activation_id: &str) -> Result<SmsStatus, AppError>;

    /// Release the number without using it
    async fn cancel_activation(&self, activation_id: &str) -> Result<(), AppError>;

    /// Tell the provider the code was used
    async fn finish_activation(&self, activation_id: &str) -> Result<(), AppError> {
        let _ = activation_id;
        Ok(())
    }
}

/// Payment gateway (bank transfer aggregator or crypto invoices)
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Header carrying the webhook signature
    fn signature_header(&self) -> &'static str;

    /// Check gateway connectivity
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    /// Open a hosted checkout for a deposit
    async fn create_checkout(&self, request: &CheckoutRequest)
    -> Result<CheckoutSession, AppError>;

    /// Verify a webhook signature over the raw request body
    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool;

    /// Parse a verified webhook body
    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent, AppError>;

    /// Look up the deposit status on the gateway
    async fn fetch_status(&self, deposit: &Deposit) -> Result<GatewayEvent, AppError> {
        let _ = deposit;
        Err(AppError::NotSupported(format!(
            "{} does not support status lookups",
            self.provider()
        )))
    }
}

/// Outbound email
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::DepositStatus;

    struct MinimalGateway;

    #[async_trait]
    impl PaymentGateway for MinimalGateway {
        fn provider(&self) -> PaymentProvider {
            PaymentProvider::Crypto
        }

        fn signature_header(&self) -> &'static str {
            "x-test-signature"
        }

        async fn create_checkout(
            &self,
            request: &CheckoutRequest,
        ) -> Result<CheckoutSession, AppError> {
            Ok(CheckoutSession {
                checkout_url: format!("https://pay.test/{}", request.reference),
                provider_reference: None,
            })
        }

        fn verify_signature(&self, _payload: &[u8], _signature: &str) -> bool {
            true
        }

        fn parse_event(&self, _payload: &[u8]) -> Result<GatewayEvent, AppError> {
            Err(AppError::Deserialization("unused".to_string()))
        }
    }

    struct MinimalSmsProvider;

    #[async_trait]
    impl SmsProvider for MinimalSmsProvider {
        fn name(&self) -> &'static str {
            "minimal"
        }

        async fn health_check(&self) -> Result<(), AppError> {
            Ok(())
        }

        async fn get_offer(
            &self,
            _service: &str,
            _country: &str,
        ) -> Result<Option<ProviderOffer>, AppError> {
            Ok(None)
        }

        async fn purchase_number(
            &self,
            _service: &str,
            _country: &str,
        ) -> Result<ProviderActivation, AppError> {
            Err(AppError::NotSupported("unused".to_string()))
        }

        async fn check_sms(&self, _activation_id: &str) -> Result<SmsStatus, AppError> {
            Ok(SmsStatus::Waiting)
        }

        async fn cancel_activation(&self, _activation_id: &str) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_gateway_fetch_status_not_supported_by_default() {
        let gateway = MinimalGateway;
        let deposit = Deposit {
            id: "d1".to_string(),
            user_id: "u1".to_string(),
            provider: PaymentProvider::Crypto,
            reference: "INS-1".to_string(),
            amount_kobo: 100_000,
            credited_kobo: None,
            status: DepositStatus::Pending,
            provider_reference: None,
            checkout_url: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let result = gateway.fetch_status(&deposit).await;
        assert!(matches!(result, Err(AppError::NotSupported(_))));
        assert!(gateway.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_sms_provider_finish_defaults_to_noop() {
        let provider = MinimalSmsProvider;
        assert!(provider.finish_activation("123").await.is_ok());
    }
}
