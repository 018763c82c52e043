//! Core account, ledger and API envelope types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Kind of movement recorded in the wallet ledger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Gateway deposit (bank transfer or crypto)
    Deposit,
    /// Admin-approved manual payment
    ManualDeposit,
    /// Payment for a number rental
    RentalDebit,
    /// Rental price returned to the wallet
    RentalRefund,
    /// Bonus paid to a referrer
    ReferralBonus,
    /// Loyalty points converted to credit
    LoyaltyRedemption,
    /// Manual correction by an administrator
    AdminAdjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::ManualDeposit => "manual_deposit",
            Self::RentalDebit => "rental_debit",
            Self::RentalRefund => "rental_refund",
            Self::ReferralBonus => "referral_bonus",
            Self::LoyaltyRedemption => "loyalty_redemption",
            Self::AdminAdjustment => "admin_adjustment",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "manual_deposit" => Ok(Self::ManualDeposit),
            "rental_debit" => Ok(Self::RentalDebit),
            "rental_refund" => Ok(Self::RentalRefund),
            "referral_bonus" => Ok(Self::ReferralBonus),
            "loyalty_redemption" => Ok(Self::LoyaltyRedemption),
            "admin_adjustment" => Ok(Self::AdminAdjustment),
            _ => Err(format!("Invalid transaction kind: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registered customer with an embedded wallet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct User {
    /// Unique identifier (UUID)
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "Ada")]
    pub display_name: String,
    /// Spendable wallet balance in kobo
    #[schema(example = 250_000)]
    pub balance_kobo: i64,
    /// Lifetime credited deposits in kobo (gateway and manual)
    pub total_deposited_kobo: i64,
    /// Lifetime spend on completed rentals in kobo
    pub total_spent_kobo: i64,
    /// Unredeemed loyalty points
    pub loyalty_points: i64,
    /// Code other users enter at sign-up
    #[schema(example = "K7Q2M9XA")]
    pub referral_code: String,
    /// ID of the user who referred this one
    pub referred_by: Option<String>,
    /// Whether the referrer has already been paid for this user
    pub referral_bonus_paid: bool,
    pub is_suspended: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(id: String, email: String, display_name: String, referral_code: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            display_name,
            balance_kobo: 0,
            total_deposited_kobo: 0,
            total_spent_kobo: 0,
            loyalty_points: 0,
            referral_code,
            referred_by: None,
            referral_bonus_paid: false,
            is_suspended: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Data needed to persist a new user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub api_token_hash: String,
}

/// Request to create an account
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterUserRequest {
    #[validate(email(message = "A valid email address is required"))]
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[validate(length(min = 1, max = 64, message = "Display name must be 1-64 characters"))]
    #[schema(example = "Ada")]
    pub display_name: String,
    /// Optional referral code of an existing user
    #[schema(example = "K7Q2M9XA")]
    pub referral_code: Option<String>,
}

/// Account creation result. The token is shown exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterUserResponse {
    pub user: User,
    /// Bearer token for subsequent requests
    #[schema(example = "inum_3f9c0e...")]
    pub api_token: String,
}

/// One row of the wallet ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WalletTransaction {
    pub id: String,
    pub user_id: String,
    pub kind: TransactionKind,
    /// Signed amount in kobo (credits positive, debits negative)
    #[schema(example = -45_000)]
    pub amount_kobo: i64,
    /// Wallet balance right after this entry
    pub balance_after_kobo: i64,
    /// Related deposit reference, rental ID, etc.
    pub reference: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Ledger entry to apply atomically with a balance change
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub kind: TransactionKind,
    pub amount_kobo: i64,
    pub reference: Option<String>,
    pub description: String,
}

/// Largest single admin adjustment (₦1bn) in either direction
pub const MAX_ADJUSTMENT_KOBO: i64 = 100_000_000_000;
pub const MIN_ADJUSTMENT_KOBO: i64 = -MAX_ADJUSTMENT_KOBO;

/// Admin request to credit or debit a wallet
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AdjustBalanceRequest {
    /// Signed amount in kobo, must not be zero
    #[validate(range(
        min = MIN_ADJUSTMENT_KOBO,
        max = MAX_ADJUSTMENT_KOBO,
        message = "Amount is outside the adjustable range"
    ))]
    #[schema(example = 100_000)]
    pub amount_kobo: i64,
    #[validate(length(min = 1, max = 255, message = "Reason must be 1-255 characters"))]
    #[schema(example = "Goodwill credit for failed delivery")]
    pub reason: String,
}

/// Admin request to suspend or reinstate an account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SuspendUserRequest {
    pub suspended: bool,
}

/// Pagination parameters for list requests
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaginationParams {
    /// Maximum number of items to return (1-100, default: 20)
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[serde(default = "default_limit")]
    #[schema(example = 20)]
    pub limit: i64,
    /// Cursor for pagination (ID to start after)
    #[schema(example = "uuid-string")]
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            cursor: None,
        }
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    /// List of items
    pub items: Vec<T>,
    /// Cursor for next page (null if no more items)
    #[schema(example = "uuid-string")]
    pub next_cursor: Option<String>,
    /// Whether more items exist
    pub has_more: bool,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Per-dependency health
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComponentHealth {
    #[schema(example = "sms_provider")]
    pub name: String,
    pub status: HealthStatus,
    /// Error message when the check failed
    pub detail: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Database health status
    pub database: HealthStatus,
    /// Third-party providers (SMS, gateways, email)
    pub providers: Vec<ComponentHealth>,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    /// The database is critical; providers only degrade the service.
    #[must_use]
    pub fn new(database: HealthStatus, providers: Vec<ComponentHealth>) -> Self {
        let any_provider_down = providers
            .iter()
            .any(|p| p.status != HealthStatus::Healthy);
        let status = match database {
            HealthStatus::Unhealthy => HealthStatus::Unhealthy,
            HealthStatus::Degraded => HealthStatus::Degraded,
            HealthStatus::Healthy if any_provider_down => HealthStatus::Degraded,
            HealthStatus::Healthy => HealthStatus::Healthy,
        };
        Self {
            status,
            database,
            providers,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Aggregate figures for the admin dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct SystemStats {
    pub total_users: i64,
    /// Sum of all wallet balances in kobo
    pub total_wallet_balance_kobo: i64,
    /// Sum of completed gateway and manual deposits in kobo
    pub total_deposits_kobo: i64,
    pub pending_manual_payments: i64,
    pub active_rentals: i64,
    pub pending_refund_requests: i64,
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "validation_error")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "Display name must be 1-64 characters")]
    pub message: String,
}

/// Rate limit exceeded response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateLimitResponse {
    /// Error details
    pub error: ErrorDetail,
    /// Seconds until rate limit resets
    #[schema(example = 60)]
    pub retry_after: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transaction_kind_display_and_parsing() {
        let kinds = vec![
            (TransactionKind::Deposit, "deposit"),
            (TransactionKind::ManualDeposit, "manual_deposit"),
            (TransactionKind::RentalDebit, "rental_debit"),
            (TransactionKind::RentalRefund, "rental_refund"),
            (TransactionKind::ReferralBonus, "referral_bonus"),
            (TransactionKind::LoyaltyRedemption, "loyalty_redemption"),
            (TransactionKind::AdminAdjustment, "admin_adjustment"),
        ];

        for (kind, string) in kinds {
            assert_eq!(kind.as_str(), string);
            assert_eq!(kind.to_string(), string);
            assert_eq!(TransactionKind::from_str(string).unwrap(), kind);
        }

        assert!(TransactionKind::from_str("invalid").is_err());
    }

    #[test]
    fn test_register_request_validation() {
        let req = RegisterUserRequest {
            email: "ada@example.com".to_string(),
            display_name: "Ada".to_string(),
            referral_code: None,
        };
        assert!(req.validate().is_ok());

        let req = RegisterUserRequest {
            email: "not-an-email".to_string(),
            display_name: "Ada".to_string(),
            referral_code: None,
        };
        assert!(req.validate().is_err());

        let req = RegisterUserRequest {
            email: "ada@example.com".to_string(),
            display_name: "".to_string(),
            referral_code: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_adjust_request_amount_bounds() {
        let adjust = |amount_kobo: i64| AdjustBalanceRequest {
            amount_kobo,
            reason: "Correction".to_string(),
        };
        assert!(adjust(-50_000).validate().is_ok());
        assert!(adjust(MAX_ADJUSTMENT_KOBO).validate().is_ok());
        assert!(adjust(MIN_ADJUSTMENT_KOBO).validate().is_ok());
        assert!(adjust(MAX_ADJUSTMENT_KOBO + 1).validate().is_err());
        assert!(adjust(i64::MIN).validate().is_err());
        assert!(adjust(i64::MAX).validate().is_err());
    }

    #[test]
    fn test_new_user_defaults() {
        let user = User::new(
            "u1".to_string(),
            "ada@example.com".to_string(),
            "Ada".to_string(),
            "CODE1234".to_string(),
        );
        assert_eq!(user.balance_kobo, 0);
        assert_eq!(user.loyalty_points, 0);
        assert!(user.referred_by.is_none());
        assert!(!user.referral_bonus_paid);
        assert!(!user.is_suspended);
    }

    #[test]
    fn test_health_response_status_aggregation() {
        let healthy = |name: &str| ComponentHealth {
            name: name.to_string(),
            status: HealthStatus::Healthy,
            detail: None,
        };

        let all_ok = HealthResponse::new(HealthStatus::Healthy, vec![healthy("sms_provider")]);
        assert_eq!(all_ok.status, HealthStatus::Healthy);

        let provider_down = HealthResponse::new(
            HealthStatus::Healthy,
            vec![ComponentHealth {
                name: "crypto_gateway".to_string(),
                status: HealthStatus::Unhealthy,
                detail: Some("timeout".to_string()),
            }],
        );
        assert_eq!(provider_down.status, HealthStatus::Degraded);

        let db_down = HealthResponse::new(HealthStatus::Unhealthy, vec![healthy("email")]);
        assert_eq!(db_down.status, HealthStatus::Unhealthy);
    }
}
