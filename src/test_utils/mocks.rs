//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::domain::{
    AppError, CheckoutRequest, CheckoutSession, CreateRefundRequest, CreditOutcome, CreditReceipt,
    DatabaseClient, DatabaseError, Deposit, DepositStatus, EmailMessage, ExternalServiceError,
    GatewayEvent, GatewayOutcome, LedgerEntry, ManualPayment, ManualPaymentStatus, NewDeposit,
    NewManualPayment, NewRental, NewUser, Notifier, PaginatedResponse, PaymentGateway,
    PaymentProvider, ProviderActivation, ProviderOffer, RedemptionResult, ReferralBonus,
    ReferredUser, RefundOutcome, RefundRequest, RefundRequestStatus, Rental, RentalStatus,
    RewardsConfig, SmsProvider, SmsStatus, SystemStats, TransactionKind, User, ValidationError,
    WalletTransaction,
};
use crate::infra::payments::{BANK_SIGNATURE_HEADER, CRYPTO_SIGNATURE_HEADER};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }

    fn message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| "Mock error".to_string())
    }
}

/// Keyset pagination over rows stored oldest first
fn paginate<T: Clone + utoipa::ToSchema>(
    rows: impl DoubleEndedIterator<Item = T>,
    id_of: impl Fn(&T) -> String,
    limit: i64,
    cursor: Option<&str>,
) -> Result<PaginatedResponse<T>, AppError> {
    let items: Vec<T> = rows.rev().collect();

    let items = match cursor {
        Some(cursor_id) => match items.iter().position(|i| id_of(i) == cursor_id) {
            Some(p) => items.into_iter().skip(p + 1).collect(),
            None => {
                return Err(AppError::Validation(ValidationError::invalid(
                    "cursor",
                    "Invalid cursor",
                )));
            }
        },
        None => items,
    };

    let limit = limit.clamp(1, 100) as usize;
    let has_more = items.len() > limit;
    let items: Vec<T> = items.into_iter().take(limit).collect();
    let next_cursor = if has_more {
        items.last().map(&id_of)
    } else {
        None
    };

    Ok(PaginatedResponse::new(items, next_cursor, has_more))
}

#[derive(Default)]
struct Store {
    users: Vec<(User, String)>,
    transactions: Vec<WalletTransaction>,
    deposits: Vec<Deposit>,
    manual_payments: Vec<ManualPayment>,
    rentals: Vec<Rental>,
    refund_requests: Vec<RefundRequest>,
    referral_rewards: Vec<ReferralBonus>,
}

impl Store {
    fn user_mut(&mut self, id: &str) -> Result<&mut User, AppError> {
        self.users
            .iter_mut()
            .map(|(u, _)| u)
            .find(|u| u.id == id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("User {}", id))))
    }

    fn ledger(&mut self, user_id: &str, entry: &LedgerEntry, balance_after: i64) -> WalletTransaction {
        let transaction = WalletTransaction {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: entry.kind,
            amount_kobo: entry.amount_kobo,
            balance_after_kobo: balance_after,
            reference: entry.reference.clone(),
            description: entry.description.clone(),
            created_at: Utc::now(),
        };
        self.transactions.push(transaction.clone());
        transaction
    }

    /// Same rules as the Postgres credit: deposits also count toward the
    /// referral threshold when `rewards` is set
    fn credit(
        &mut self,
        user_id: &str,
        entry: &LedgerEntry,
        rewards: Option<&RewardsConfig>,
    ) -> Result<CreditReceipt, AppError> {
        let user = self.user_mut(user_id)?;
        user.balance_kobo += entry.amount_kobo;
        if rewards.is_some() {
            user.total_deposited_kobo += entry.amount_kobo;
        }
        user.updated_at = Utc::now();
        let balance_after = user.balance_kobo;
        let total_deposited = user.total_deposited_kobo;
        let referred_by = user.referred_by.clone();
        let bonus_paid = user.referral_bonus_paid;

        self.ledger(user_id, entry, balance_after);

        let mut referral_bonus = None;
        if let (Some(rewards), Some(referrer_id)) = (rewards, referred_by)
            && rewards.referral_bonus_due(Some(&referrer_id), bonus_paid, total_deposited)
        {
            self.user_mut(user_id)?.referral_bonus_paid = true;
            let referrer_balance = match self.user_mut(&referrer_id) {
                Ok(referrer) => {
                    referrer.balance_kobo += rewards.referral_bonus_kobo;
                    Some(referrer.balance_kobo)
                }
                Err(_) => None,
            };
            if let Some(referrer_balance) = referrer_balance {
                let bonus_entry = LedgerEntry {
                    kind: TransactionKind::ReferralBonus,
                    amount_kobo: rewards.referral_bonus_kobo,
                    reference: Some(user_id.to_string()),
                    description: "Referral bonus".to_string(),
                };
                self.ledger(&referrer_id, &bonus_entry, referrer_balance);
                let bonus = ReferralBonus {
                    referrer_id,
                    referee_id: user_id.to_string(),
                    amount_kobo: rewards.referral_bonus_kobo,
                };
                self.referral_rewards.push(bonus.clone());
                referral_bonus = Some(bonus);
            }
        }

        Ok(CreditReceipt {
            user_id: user_id.to_string(),
            amount_kobo: entry.amount_kobo,
            balance_after_kobo: balance_after,
            referral_bonus,
        })
    }
}

/// In-memory database client for testing
pub struct MockDatabaseClient {
    store: Arc<Mutex<Store>>,
    config: MockConfig,
    is_healthy: AtomicBool,
}

impl MockDatabaseClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Overwrite a wallet balance without a ledger row
    pub fn set_balance(&self, user_id: &str, balance_kobo: i64) {
        let mut store = self.store.lock().unwrap();
        if let Ok(user) = store.user_mut(user_id) {
            user.balance_kobo = balance_kobo;
        }
    }

    /// Overwrite a user's loyalty points
    pub fn set_loyalty_points(&self, user_id: &str, points: i64) {
        let mut store = self.store.lock().unwrap();
        if let Ok(user) = store.user_mut(user_id) {
            user.loyalty_points = points;
        }
    }

    /// Move a rental's deadline, e.g. into the past to make it overdue
    pub fn set_rental_expiry(&self, rental_id: &str, expires_at: DateTime<Utc>) {
        let mut store = self.store.lock().unwrap();
        if let Some(rental) = store.rentals.iter_mut().find(|r| r.id == rental_id) {
            rental.expires_at = Some(expires_at);
        }
    }

    pub fn set_rental_created_at(&self, rental_id: &str, created_at: DateTime<Utc>) {
        let mut store = self.store.lock().unwrap();
        if let Some(rental) = store.rentals.iter_mut().find(|r| r.id == rental_id) {
            rental.created_at = created_at;
        }
    }

    pub fn get_user_now(&self, id: &str) -> Option<User> {
        let store = self.store.lock().unwrap();
        store
            .users
            .iter()
            .find(|(u, _)| u.id == id)
            .map(|(u, _)| u.clone())
    }

    /// Ledger rows for a user, oldest first
    pub fn transactions_for(&self, user_id: &str) -> Vec<WalletTransaction> {
        let store = self.store.lock().unwrap();
        store
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn all_deposits(&self) -> Vec<Deposit> {
        self.store.lock().unwrap().deposits.clone()
    }

    pub fn all_rentals(&self) -> Vec<Rental> {
        self.store.lock().unwrap().rentals.clone()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Database(DatabaseError::Query(
                self.config.message(),
            )));
        }
        Ok(())
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn create_user(&self, data: &NewUser) -> Result<User, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        for (user, token_hash) in &store.users {
            let constraint = if user.email == data.email {
                Some("users_email_key")
            } else if user.referral_code == data.referral_code {
                Some("users_referral_code_key")
            } else if *token_hash == data.api_token_hash {
                Some("users_api_token_hash_key")
            } else {
                None
            };
            if let Some(constraint) = constraint {
                return Err(AppError::Database(DatabaseError::Duplicate(format!(
                    "duplicate key value violates unique constraint \"{}\"",
                    constraint
                ))));
            }
        }

        let mut user = User::new(
            Uuid::new_v4().to_string(),
            data.email.clone(),
            data.display_name.clone(),
            data.referral_code.clone(),
        );
        user.referred_by = data.referred_by.clone();
        store.users.push((user.clone(), data.api_token_hash.clone()));
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        self.check_should_fail()?;
        Ok(self.get_user_now(id))
    }

    async fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        Ok(store
            .users
            .iter()
            .find(|(_, hash)| hash == token_hash)
            .map(|(u, _)| u.clone()))
    }

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        Ok(store
            .users
            .iter()
            .find(|(u, _)| u.referral_code == code)
            .map(|(u, _)| u.clone()))
    }

    async fn list_users(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<User>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        paginate(
            store.users.iter().map(|(u, _)| u.clone()),
            |u| u.id.clone(),
            limit,
            cursor,
        )
    }

    async fn set_user_suspended(&self, id: &str, suspended: bool) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        match store.user_mut(id) {
            Ok(user) => {
                user.is_suspended = suspended;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn list_referred_users(&self, referrer_id: &str) -> Result<Vec<ReferredUser>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        Ok(store
            .users
            .iter()
            .rev()
            .filter(|(u, _)| u.referred_by.as_deref() == Some(referrer_id))
            .map(|(u, _)| ReferredUser {
                user_id: u.id.clone(),
                display_name: u.display_name.clone(),
                joined_at: u.created_at,
                bonus_paid: u.referral_bonus_paid,
            })
            .collect())
    }

    async fn total_referral_bonus(&self, referrer_id: &str) -> Result<i64, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        Ok(store
            .referral_rewards
            .iter()
            .filter(|r| r.referrer_id == referrer_id)
            .map(|r| r.amount_kobo)
            .sum())
    }

    async fn apply_ledger_entry(
        &self,
        user_id: &str,
        entry: &LedgerEntry,
    ) -> Result<WalletTransaction, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        let user = store.user_mut(user_id)?;
        let balance_after = match user.balance_kobo.checked_add(entry.amount_kobo) {
            Some(balance) if balance >= 0 => balance,
            _ => {
                return Err(AppError::InsufficientFunds {
                    required: entry.amount_kobo.checked_neg().unwrap_or(i64::MAX),
                    available: user.balance_kobo,
                });
            }
        };
        user.balance_kobo = balance_after;
        Ok(store.ledger(user_id, entry, balance_after))
    }

    async fn list_wallet_transactions(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WalletTransaction>, AppError> {
        self.check_should_fail()?;
        let rows = self.transactions_for(user_id);
        paginate(rows.into_iter(), |t| t.id.clone(), limit, cursor)
    }

    async fn create_deposit(&self, data: &NewDeposit) -> Result<Deposit, AppError> {
        self.check_should_fail()?;
        let deposit = Deposit {
            id: Uuid::new_v4().to_string(),
            user_id: data.user_id.clone(),
            provider: data.provider,
            reference: data.reference.clone(),
            amount_kobo: data.amount_kobo,
            credited_kobo: None,
            status: DepositStatus::Pending,
            provider_reference: None,
            checkout_url: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.store.lock().unwrap().deposits.push(deposit.clone());
        Ok(deposit)
    }

    async fn attach_checkout(
        &self,
        reference: &str,
        checkout_url: &str,
        provider_reference: Option<&str>,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        if let Some(deposit) = store.deposits.iter_mut().find(|d| d.reference == reference) {
            deposit.checkout_url = Some(checkout_url.to_string());
            if let Some(provider_reference) = provider_reference {
                deposit.provider_reference = Some(provider_reference.to_string());
            }
        }
        Ok(())
    }

    async fn get_deposit_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Deposit>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        Ok(store
            .deposits
            .iter()
            .find(|d| d.reference == reference)
            .cloned())
    }

    async fn list_deposits(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Deposit>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        paginate(
            store.deposits.iter().filter(|d| d.user_id == user_id).cloned(),
            |d| d.id.clone(),
            limit,
            cursor,
        )
    }

    async fn complete_deposit(
        &self,
        reference: &str,
        amount_kobo: i64,
        provider_reference: Option<&str>,
        rewards: &RewardsConfig,
    ) -> Result<CreditOutcome, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        let deposit = store
            .deposits
            .iter_mut()
            .find(|d| d.reference == reference)
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(format!("Deposit {}", reference)))
            })?;
        if !matches!(deposit.status, DepositStatus::Pending | DepositStatus::Failed) {
            return Ok(CreditOutcome::AlreadyProcessed);
        }
        deposit.status = DepositStatus::Completed;
        deposit.failure_reason = None;
        deposit.credited_kobo = Some(amount_kobo);
        deposit.completed_at = Some(Utc::now());
        if let Some(provider_reference) = provider_reference {
            deposit.provider_reference = Some(provider_reference.to_string());
        }
        let user_id = deposit.user_id.clone();
        let provider = deposit.provider;

        let entry = LedgerEntry {
            kind: TransactionKind::Deposit,
            amount_kobo,
            reference: Some(reference.to_string()),
            description: format!("Wallet funding via {}", provider.as_str().replace('_', " ")),
        };
        let receipt = store.credit(&user_id, &entry, Some(rewards))?;
        Ok(CreditOutcome::Credited(receipt))
    }

    async fn fail_deposit(&self, reference: &str, reason: &str) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        match store
            .deposits
            .iter_mut()
            .find(|d| d.reference == reference && d.status == DepositStatus::Pending)
        {
            Some(deposit) => {
                deposit.status = DepositStatus::Failed;
                deposit.failure_reason = Some(reason.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_manual_payment(
        &self,
        data: &NewManualPayment,
    ) -> Result<ManualPayment, AppError> {
        self.check_should_fail()?;
        let payment = ManualPayment {
            id: Uuid::new_v4().to_string(),
            user_id: data.user_id.clone(),
            amount_kobo: data.amount_kobo,
            receipt_url: data.receipt_url.clone(),
            sender_name: data.sender_name.clone(),
            note: data.note.clone(),
            status: ManualPaymentStatus::Pending,
            reviewed_by: None,
            review_note: None,
            created_at: Utc::now(),
            reviewed_at: None,
        };
        self.store
            .lock()
            .unwrap()
            .manual_payments
            .push(payment.clone());
        Ok(payment)
    }

    async fn get_manual_payment(&self, id: &str) -> Result<Option<ManualPayment>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        Ok(store.manual_payments.iter().find(|p| p.id == id).cloned())
    }

    async fn list_manual_payments(
        &self,
        user_id: Option<&str>,
        status: Option<ManualPaymentStatus>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<ManualPayment>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        paginate(
            store
                .manual_payments
                .iter()
                .filter(|p| user_id.is_none_or(|u| p.user_id == u))
                .filter(|p| status.is_none_or(|s| p.status == s))
                .cloned(),
            |p| p.id.clone(),
            limit,
            cursor,
        )
    }

    async fn approve_manual_payment(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
        rewards: &RewardsConfig,
    ) -> Result<CreditOutcome, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        let Some(payment) = store
            .manual_payments
            .iter_mut()
            .find(|p| p.id == id && p.status == ManualPaymentStatus::Pending)
        else {
            return Ok(CreditOutcome::AlreadyProcessed);
        };
        payment.status = ManualPaymentStatus::Approved;
        payment.reviewed_by = Some(reviewer.to_string());
        payment.review_note = note.map(str::to_string);
        payment.reviewed_at = Some(Utc::now());
        let user_id = payment.user_id.clone();

        let entry = LedgerEntry {
            kind: TransactionKind::ManualDeposit,
            amount_kobo: payment.amount_kobo,
            reference: Some(id.to_string()),
            description: "Manual payment approved".to_string(),
        };
        let receipt = store.credit(&user_id, &entry, Some(rewards))?;
        Ok(CreditOutcome::Credited(receipt))
    }

    async fn reject_manual_payment(
        &self,
        id: &str,
        reviewer: &str,
        note: &str,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        match store
            .manual_payments
            .iter_mut()
            .find(|p| p.id == id && p.status == ManualPaymentStatus::Pending)
        {
            Some(payment) => {
                payment.status = ManualPaymentStatus::Rejected;
                payment.reviewed_by = Some(reviewer.to_string());
                payment.review_note = Some(note.to_string());
                payment.reviewed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reserve_rental(&self, data: &NewRental) -> Result<Rental, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        let user = store.user_mut(&data.user_id)?;
        if user.balance_kobo < data.price_kobo {
            return Err(AppError::InsufficientFunds {
                required: data.price_kobo,
                available: user.balance_kobo,
            });
        }
        user.balance_kobo -= data.price_kobo;
        let balance_after = user.balance_kobo;

        let now = Utc::now();
        let rental = Rental {
            id: Uuid::new_v4().to_string(),
            user_id: data.user_id.clone(),
            service: data.service.clone(),
            country: data.country.clone(),
            price_kobo: data.price_kobo,
            status: RentalStatus::Pending,
            activation_id: None,
            phone_number: None,
            sms_code: None,
            sms_text: None,
            refunded: false,
            points_awarded: 0,
            expires_at: None,
            created_at: now,
            updated_at: now,
        };
        store.rentals.push(rental.clone());

        let entry = LedgerEntry {
            kind: TransactionKind::RentalDebit,
            amount_kobo: -data.price_kobo,
            reference: Some(rental.id.clone()),
            description: format!("Number rental: {} ({})", data.service, data.country),
        };
        store.ledger(&data.user_id, &entry, balance_after);
        Ok(rental)
    }

    async fn activate_rental(
        &self,
        id: &str,
        activation: &ProviderActivation,
        expires_at: DateTime<Utc>,
    ) -> Result<Rental, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        let rental = store
            .rentals
            .iter_mut()
            .find(|r| r.id == id && r.status == RentalStatus::Pending)
            .ok_or_else(|| AppError::InvalidState(format!("Rental {} is not pending", id)))?;
        rental.status = RentalStatus::Active;
        rental.activation_id = Some(activation.activation_id.clone());
        rental.phone_number = Some(activation.phone_number.clone());
        rental.expires_at = Some(expires_at);
        rental.updated_at = Utc::now();
        Ok(rental.clone())
    }

    async fn get_rental(&self, id: &str) -> Result<Option<Rental>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        Ok(store.rentals.iter().find(|r| r.id == id).cloned())
    }

    async fn list_rentals(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Rental>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        paginate(
            store.rentals.iter().filter(|r| r.user_id == user_id).cloned(),
            |r| r.id.clone(),
            limit,
            cursor,
        )
    }

    async fn complete_rental(
        &self,
        id: &str,
        code: &str,
        text: Option<&str>,
        loyalty_points: i64,
    ) -> Result<Option<Rental>, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        let Some(rental) = store
            .rentals
            .iter_mut()
            .find(|r| r.id == id && r.status == RentalStatus::Active && !r.refunded)
        else {
            return Ok(None);
        };
        rental.status = RentalStatus::Completed;
        rental.sms_code = Some(code.to_string());
        rental.sms_text = text.map(str::to_string);
        rental.points_awarded = loyalty_points.max(0);
        rental.updated_at = Utc::now();
        let rental = rental.clone();

        let user = store.user_mut(&rental.user_id)?;
        user.total_spent_kobo += rental.price_kobo;
        user.loyalty_points += rental.points_awarded;
        Ok(Some(rental))
    }

    async fn refund_rental(
        &self,
        id: &str,
        final_status: Option<RentalStatus>,
        description: &str,
    ) -> Result<RefundOutcome, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        let rental = store
            .rentals
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("Rental {}", id))))?;
        if rental.refunded {
            return Ok(RefundOutcome::AlreadyRefunded);
        }
        if final_status.is_some() && rental.sms_code.is_some() {
            return Err(AppError::InvalidState(
                "SMS code already received for this rental".to_string(),
            ));
        }
        rental.refunded = true;
        if let Some(status) = final_status {
            rental.status = status;
        }
        rental.updated_at = Utc::now();
        let user_id = rental.user_id.clone();
        let price_kobo = rental.price_kobo;
        let delivered = rental.sms_code.is_some();
        let points_awarded = rental.points_awarded;

        if delivered {
            let user = store.user_mut(&user_id)?;
            user.total_spent_kobo = (user.total_spent_kobo - price_kobo).max(0);
            user.loyalty_points = (user.loyalty_points - points_awarded).max(0);
        }

        let entry = LedgerEntry {
            kind: TransactionKind::RentalRefund,
            amount_kobo: price_kobo,
            reference: Some(id.to_string()),
            description: description.to_string(),
        };
        let receipt = store.credit(&user_id, &entry, None)?;
        Ok(RefundOutcome::Refunded {
            amount_kobo: receipt.amount_kobo,
            balance_after_kobo: receipt.balance_after_kobo,
        })
    }

    async fn get_overdue_rentals(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rental>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        let mut overdue: Vec<Rental> = store
            .rentals
            .iter()
            .filter(|r| r.is_overdue(now) || r.is_stale_pending(pending_before))
            .cloned()
            .collect();
        overdue.sort_by_key(|r| r.expires_at.unwrap_or(r.created_at));
        Ok(overdue.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn create_refund_request(
        &self,
        user_id: &str,
        data: &CreateRefundRequest,
    ) -> Result<RefundRequest, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        if store
            .refund_requests
            .iter()
            .any(|r| r.rental_id == data.rental_id && r.status == RefundRequestStatus::Pending)
        {
            return Err(AppError::Database(DatabaseError::Duplicate(
                "duplicate key value violates unique constraint \"idx_refund_requests_open\""
                    .to_string(),
            )));
        }
        let request = RefundRequest {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            rental_id: data.rental_id.clone(),
            reason: data.reason.clone(),
            status: RefundRequestStatus::Pending,
            admin_note: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        store.refund_requests.push(request.clone());
        Ok(request)
    }

    async fn get_refund_request(&self, id: &str) -> Result<Option<RefundRequest>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        Ok(store.refund_requests.iter().find(|r| r.id == id).cloned())
    }

    async fn list_refund_requests(
        &self,
        user_id: Option<&str>,
        status: Option<RefundRequestStatus>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<RefundRequest>, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        paginate(
            store
                .refund_requests
                .iter()
                .filter(|r| user_id.is_none_or(|u| r.user_id == u))
                .filter(|r| status.is_none_or(|s| r.status == s))
                .cloned(),
            |r| r.id.clone(),
            limit,
            cursor,
        )
    }

    async fn resolve_refund_request(
        &self,
        id: &str,
        status: RefundRequestStatus,
        note: Option<&str>,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        match store
            .refund_requests
            .iter_mut()
            .find(|r| r.id == id && r.status == RefundRequestStatus::Pending)
        {
            Some(request) => {
                request.status = status;
                request.admin_note = note.map(str::to_string);
                request.resolved_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn redeem_loyalty_points(
        &self,
        user_id: &str,
        points: i64,
        credit_kobo: i64,
    ) -> Result<RedemptionResult, AppError> {
        self.check_should_fail()?;
        let mut store = self.store.lock().unwrap();
        let user = store.user_mut(user_id)?;
        if user.loyalty_points < points {
            return Err(AppError::Validation(ValidationError::invalid(
                "points",
                format!("Only {} points available", user.loyalty_points),
            )));
        }
        user.loyalty_points -= points;
        user.balance_kobo += credit_kobo;
        let remaining = user.loyalty_points;
        let balance_after = user.balance_kobo;

        let entry = LedgerEntry {
            kind: TransactionKind::LoyaltyRedemption,
            amount_kobo: credit_kobo,
            reference: None,
            description: format!("Redeemed {} loyalty points", points),
        };
        store.ledger(user_id, &entry, balance_after);
        Ok(RedemptionResult {
            points_redeemed: points,
            credited_kobo: credit_kobo,
            remaining_points: remaining,
            balance_after_kobo: balance_after,
        })
    }

    async fn system_stats(&self) -> Result<SystemStats, AppError> {
        self.check_should_fail()?;
        let store = self.store.lock().unwrap();
        let gateway_total: i64 = store
            .deposits
            .iter()
            .filter(|d| d.status == DepositStatus::Completed)
            .filter_map(|d| d.credited_kobo)
            .sum();
        let manual_total: i64 = store
            .manual_payments
            .iter()
            .filter(|p| p.status == ManualPaymentStatus::Approved)
            .map(|p| p.amount_kobo)
            .sum();
        Ok(SystemStats {
            total_users: store.users.len() as i64,
            total_wallet_balance_kobo: store.users.iter().map(|(u, _)| u.balance_kobo).sum(),
            total_deposits_kobo: gateway_total + manual_total,
            pending_manual_payments: store
                .manual_payments
                .iter()
                .filter(|p| p.status == ManualPaymentStatus::Pending)
                .count() as i64,
            active_rentals: store
                .rentals
                .iter()
                .filter(|r| r.status == RentalStatus::Active)
                .count() as i64,
            pending_refund_requests: store
                .refund_requests
                .iter()
                .filter(|r| r.status == RefundRequestStatus::Pending)
                .count() as i64,
        })
    }
}

/// Mock SMS provider for testing
pub struct MockSmsProvider {
    offer: Mutex<Option<ProviderOffer>>,
    sms_status: Mutex<SmsStatus>,
    purchases: Mutex<Vec<ProviderActivation>>,
    cancelled: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    config: MockConfig,
    purchase_fails: AtomicBool,
    is_healthy: AtomicBool,
}

impl MockSmsProvider {
    /// Stocked with numbers costing 15 provider units; no SMS yet
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            offer: Mutex::new(Some(ProviderOffer {
                cost: 15.0,
                count: 100,
            })),
            sms_status: Mutex::new(SmsStatus::Waiting),
            purchases: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
            config,
            purchase_fails: AtomicBool::new(false),
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_offer(&self, offer: Option<ProviderOffer>) {
        *self.offer.lock().unwrap() = offer;
    }

    /// What every subsequent `check_sms` reports
    pub fn set_sms_status(&self, status: SmsStatus) {
        *self.sms_status.lock().unwrap() = status;
    }

    /// Make `purchase_number` fail while pricing still works
    pub fn set_purchase_fails(&self, fails: bool) {
        self.purchase_fails.store(fails, Ordering::Relaxed);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn purchases(&self) -> Vec<ProviderActivation> {
        self.purchases.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                self.config.message(),
            )));
        }
        Ok(())
    }
}

impl Default for MockSmsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmsProvider for MockSmsProvider {
    fn name(&self) -> &'static str {
        "sms_provider"
    }

    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn get_offer(
        &self,
        _service: &str,
        _country: &str,
    ) -> Result<Option<ProviderOffer>, AppError> {
        self.check_should_fail()?;
        Ok(self.offer.lock().unwrap().clone())
    }

    async fn purchase_number(
        &self,
        _service: &str,
        _country: &str,
    ) -> Result<ProviderActivation, AppError> {
        self.check_should_fail()?;
        if self.purchase_fails.load(Ordering::Relaxed) {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                "no free phones".to_string(),
            )));
        }
        let mut purchases = self.purchases.lock().unwrap();
        let activation = ProviderActivation {
            activation_id: format!("act-{}", purchases.len() + 1),
            phone_number: format!("+23480000000{:02}", purchases.len() + 1),
        };
        purchases.push(activation.clone());
        Ok(activation)
    }

    async fn check_sms(&self, _activation_id: &str) -> Result<SmsStatus, AppError> {
        self.check_should_fail()?;
        Ok(self.sms_status.lock().unwrap().clone())
    }

    async fn cancel_activation(&self, activation_id: &str) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.cancelled
            .lock()
            .unwrap()
            .push(activation_id.to_string());
        Ok(())
    }

    async fn finish_activation(&self, activation_id: &str) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.finished.lock().unwrap().push(activation_id.to_string());
        Ok(())
    }
}

/// Webhook body understood by [`MockPaymentGateway`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockWebhookEvent {
    pub reference: String,
    /// `succeeded`, `failed`, `pending` or anything else for ignored
    pub outcome: String,
    pub amount_kobo: Option<i64>,
    pub reason: Option<String>,
}

impl MockWebhookEvent {
    #[must_use]
    pub fn succeeded(reference: &str, amount_kobo: Option<i64>) -> Self {
        Self {
            reference: reference.to_string(),
            outcome: "succeeded".to_string(),
            amount_kobo,
            reason: None,
        }
    }

    #[must_use]
    pub fn failed(reference: &str, reason: &str) -> Self {
        Self {
            reference: reference.to_string(),
            outcome: "failed".to_string(),
            amount_kobo: None,
            reason: Some(reason.to_string()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }

    fn outcome(&self) -> GatewayOutcome {
        match self.outcome.as_str() {
            "succeeded" => GatewayOutcome::Succeeded {
                amount_kobo: self.amount_kobo,
            },
            "failed" => GatewayOutcome::Failed {
                reason: self
                    .reason
                    .clone()
                    .unwrap_or_else(|| "failed".to_string()),
            },
            "pending" => GatewayOutcome::Pending,
            _ => GatewayOutcome::Ignored,
        }
    }
}

/// Mock payment gateway for testing
pub struct MockPaymentGateway {
    provider: PaymentProvider,
    signature: String,
    status: Mutex<Option<GatewayOutcome>>,
    checkouts: Mutex<Vec<CheckoutRequest>>,
    config: MockConfig,
}

impl MockPaymentGateway {
    /// Signature every mock gateway accepts
    pub const VALID_SIGNATURE: &'static str = "valid-signature";

    #[must_use]
    pub fn new(provider: PaymentProvider) -> Self {
        Self::with_config(provider, MockConfig::success())
    }

    #[must_use]
    pub fn with_config(provider: PaymentProvider, config: MockConfig) -> Self {
        Self {
            provider,
            signature: Self::VALID_SIGNATURE.to_string(),
            status: Mutex::new(None),
            checkouts: Mutex::new(Vec::new()),
            config,
        }
    }

    #[must_use]
    pub fn failing(provider: PaymentProvider, message: impl Into<String>) -> Self {
        Self::with_config(provider, MockConfig::failure(message))
    }

    /// Outcome returned by status lookups; `None` means unsupported
    pub fn set_status(&self, outcome: Option<GatewayOutcome>) {
        *self.status.lock().unwrap() = outcome;
    }

    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.checkouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    fn signature_header(&self) -> &'static str {
        match self.provider {
            PaymentProvider::Crypto => CRYPTO_SIGNATURE_HEADER,
            _ => BANK_SIGNATURE_HEADER,
        }
    }

    async fn health_check(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                self.config.message(),
            )));
        }
        Ok(())
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, AppError> {
        if self.config.should_fail {
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: 500,
                message: self.config.message(),
            }));
        }
        self.checkouts.lock().unwrap().push(request.clone());
        Ok(CheckoutSession {
            checkout_url: format!("https://pay.mock/{}/{}", self.provider, request.reference),
            provider_reference: Some(format!("mock-{}", request.reference)),
        })
    }

    fn verify_signature(&self, _payload: &[u8], signature: &str) -> bool {
        signature == self.signature
    }

    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent, AppError> {
        let event: MockWebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| AppError::Deserialization(e.to_string()))?;
        Ok(GatewayEvent {
            reference: event.reference.clone(),
            provider_reference: None,
            outcome: event.outcome(),
        })
    }

    async fn fetch_status(&self, deposit: &Deposit) -> Result<GatewayEvent, AppError> {
        let outcome = self.status.lock().unwrap().clone().ok_or_else(|| {
            AppError::NotSupported(format!("{} does not support status lookups", self.provider))
        })?;
        Ok(GatewayEvent {
            reference: deposit.reference.clone(),
            provider_reference: None,
            outcome,
        })
    }
}

/// Mock notifier that records outgoing email
pub struct MockNotifier {
    sent: Mutex<Vec<EmailMessage>>,
    config: MockConfig,
}

impl MockNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            config,
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: 500,
                message: self.config.message(),
            }));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
