//! Account, wallet and reward operations, plus system health.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::credentials::{
    generate_api_token, generate_referral_code, hash_api_token, normalize_referral_code,
};
use crate::domain::{
    AdjustBalanceRequest, AppError, ComponentHealth, DatabaseClient, DatabaseError,
    HealthResponse, HealthStatus, LedgerEntry, NewUser, Notifier, PaginatedResponse,
    PaymentGateway, RedemptionResult, ReferralSummary, RegisterUserRequest, RegisterUserResponse,
    RewardsConfig, SmsProvider, SystemStats, TransactionKind, User, ValidationError,
    WalletTransaction,
};

/// Attempts at drawing an unused referral code
const REFERRAL_CODE_ATTEMPTS: usize = 5;

/// Application service for accounts, ledger, rewards and health
pub struct AppService {
    db_client: Arc<dyn DatabaseClient>,
    sms_provider: Arc<dyn SmsProvider>,
    gateways: Vec<Arc<dyn PaymentGateway>>,
    notifier: Arc<dyn Notifier>,
    rewards: RewardsConfig,
}

impl AppService {
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        sms_provider: Arc<dyn SmsProvider>,
        gateways: Vec<Arc<dyn PaymentGateway>>,
        notifier: Arc<dyn Notifier>,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            db_client,
            sms_provider,
            gateways,
            notifier,
            rewards,
        }
    }

    #[must_use]
    pub fn rewards(&self) -> &RewardsConfig {
        &self.rewards
    }

    /// Create an account and hand out its API token once
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(
        &self,
        request: &RegisterUserRequest,
    ) -> Result<RegisterUserResponse, AppError> {
        request.validate()?;

        let referred_by = match request
            .referral_code
            .as_deref()
            .map(normalize_referral_code)
            .filter(|c| !c.is_empty())
        {
            Some(code) => {
                let referrer = self
                    .db_client
                    .get_user_by_referral_code(&code)
                    .await?
                    .ok_or_else(|| {
                        AppError::Validation(ValidationError::invalid(
                            "referral_code",
                            "Unknown referral code",
                        ))
                    })?;
                Some(referrer.id)
            }
            None => None,
        };

        let api_token = generate_api_token();
        let mut new_user = NewUser {
            email: request.email.trim().to_lowercase(),
            display_name: request.display_name.trim().to_string(),
            referral_code: generate_referral_code(),
            referred_by,
            api_token_hash: hash_api_token(&api_token),
        };

        let mut attempts = 0;
        let user = loop {
            attempts += 1;
            match self.db_client.create_user(&new_user).await {
                Ok(user) => break user,
                Err(AppError::Database(DatabaseError::Duplicate(msg)))
                    if msg.contains("referral_code") && attempts < REFERRAL_CODE_ATTEMPTS =>
                {
                    warn!("Referral code collision, drawing a new one");
                    new_user.referral_code = generate_referral_code();
                }
                Err(AppError::Database(DatabaseError::Duplicate(_))) => {
                    return Err(AppError::Database(DatabaseError::Duplicate(
                        "An account with this email already exists".to_string(),
                    )));
                }
                Err(e) => return Err(e),
            }
        };

        info!(user_id = %user.id, referred = %user.referred_by.is_some(), "User registered");
        Ok(RegisterUserResponse { user, api_token })
    }

    /// Resolve a bearer token to an active user
    #[instrument(skip(self, token))]
    pub async fn authenticate(&self, token: &str) -> Result<User, AppError> {
        let user = self
            .db_client
            .get_user_by_token_hash(&hash_api_token(token))
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid API token".to_string()))?;

        if user.is_suspended {
            warn!(user_id = %user.id, "Suspended user attempted access");
            return Err(AppError::Authorization("Account suspended".to_string()));
        }
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: &str) -> Result<User, AppError> {
        self.db_client
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("User {}", id))))
    }

    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WalletTransaction>, AppError> {
        self.db_client
            .list_wallet_transactions(user_id, limit, cursor)
            .await
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn referral_summary(&self, user: &User) -> Result<ReferralSummary, AppError> {
        let referred_users = self.db_client.list_referred_users(&user.id).await?;
        let total_bonus_kobo = self.db_client.total_referral_bonus(&user.id).await?;
        Ok(ReferralSummary {
            referral_code: user.referral_code.clone(),
            referred_users,
            total_bonus_kobo,
            threshold_kobo: self.rewards.referral_threshold_kobo,
            bonus_kobo: self.rewards.referral_bonus_kobo,
        })
    }

    /// Convert loyalty points into wallet credit
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn redeem_points(&self, user: &User, points: i64) -> Result<RedemptionResult, AppError> {
        if points < self.rewards.min_redemption_points {
            return Err(AppError::Validation(ValidationError::invalid(
                "points",
                format!(
                    "At least {} points are required",
                    self.rewards.min_redemption_points
                ),
            )));
        }
        if points > user.loyalty_points {
            return Err(AppError::Validation(ValidationError::invalid(
                "points",
                format!("Only {} points available", user.loyalty_points),
            )));
        }

        let credit = self.rewards.redemption_value(points);
        let result = self
            .db_client
            .redeem_loyalty_points(&user.id, points, credit)
            .await?;
        info!(points = %points, credited = %credit, "Loyalty points redeemed");
        Ok(result)
    }

    #[instrument(skip(self))]
    pub async fn admin_list_users(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<User>, AppError> {
        self.db_client.list_users(limit, cursor).await
    }

    /// Credit or debit a wallet by hand
    #[instrument(skip(self, request), fields(amount = %request.amount_kobo))]
    pub async fn admin_adjust_balance(
        &self,
        user_id: &str,
        request: &AdjustBalanceRequest,
    ) -> Result<WalletTransaction, AppError> {
        request.validate()?;
        if request.amount_kobo == 0 {
            return Err(AppError::Validation(ValidationError::invalid(
                "amount_kobo",
                "Amount must not be zero",
            )));
        }

        let entry = LedgerEntry {
            kind: TransactionKind::AdminAdjustment,
            amount_kobo: request.amount_kobo,
            reference: None,
            description: request.reason.trim().to_string(),
        };
        let transaction = self.db_client.apply_ledger_entry(user_id, &entry).await?;
        info!(
            user_id = %user_id,
            balance_after = %transaction.balance_after_kobo,
            "Balance adjusted by admin"
        );
        Ok(transaction)
    }

    #[instrument(skip(self))]
    pub async fn admin_set_suspended(&self, user_id: &str, suspended: bool) -> Result<User, AppError> {
        if !self.db_client.set_user_suspended(user_id, suspended).await? {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "User {}",
                user_id
            ))));
        }
        info!(user_id = %user_id, suspended = %suspended, "User suspension updated");
        self.get_user(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn system_stats(&self) -> Result<SystemStats, AppError> {
        self.db_client.system_stats().await
    }

    /// Perform health check on all dependencies
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.db_client.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };

        let mut providers = vec![component(
            self.sms_provider.name(),
            self.sms_provider.health_check().await,
        )];
        for gateway in &self.gateways {
            providers.push(component(
                gateway.provider().as_str(),
                gateway.health_check().await,
            ));
        }
        providers.push(component("email", self.notifier.health_check().await));

        HealthResponse::new(db_health, providers)
    }

    /// Database-only readiness probe
    pub async fn is_ready(&self) -> bool {
        self.db_client.health_check().await.is_ok()
    }
}

fn component(name: &str, result: Result<(), AppError>) -> ComponentHealth {
    match result {
        Ok(()) => ComponentHealth {
            name: name.to_string(),
            status: HealthStatus::Healthy,
            detail: None,
        },
        Err(e) => {
            warn!(component = %name, error = %e, "Provider health check failed");
            ComponentHealth {
                name: name.to_string(),
                status: HealthStatus::Unhealthy,
                detail: Some(e.to_string()),
            }
        }
    }
}
