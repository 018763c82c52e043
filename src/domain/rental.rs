//! Number rental, pricing and refund types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Lifecycle of a rented number
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RentalStatus {
    /// Wallet debited, number not yet purchased
    #[default]
    Pending,
    /// Number issued, waiting for an SMS
    Active,
    /// SMS code received
    Completed,
    /// Cancelled by the user and refunded
    Cancelled,
    /// No SMS before the deadline, refunded
    Expired,
    /// Provider purchase failed, refunded
    Failed,
}

impl RentalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }

    /// No further transitions happen from these states
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Active)
    }
}

impl std::str::FromStr for RentalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid rental status: {}", s)),
        }
    }
}

impl std::fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A leased virtual number
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Rental {
    pub id: String,
    pub user_id: String,
    #[schema(example = "whatsapp")]
    pub service: String,
    #[schema(example = "nigeria")]
    pub country: String,
    /// Price charged to the wallet in kobo
    #[schema(example = 45_000)]
    pub price_kobo: i64,
    pub status: RentalStatus,
    /// Provider order ID
    pub activation_id: Option<String>,
    #[schema(example = "+2348012345678")]
    pub phone_number: Option<String>,
    #[schema(example = "482913")]
    pub sms_code: Option<String>,
    pub sms_text: Option<String>,
    /// Whether the price has been returned to the wallet
    pub refunded: bool,
    /// Loyalty points earned when the code arrived
    pub points_awarded: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rental {
    /// Rentals waiting for a code past their deadline
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == RentalStatus::Active
            && self.sms_code.is_none()
            && self.expires_at.map(|t| t <= now).unwrap_or(false)
    }

    /// Charged rentals still waiting on the provider since before `cutoff`
    #[must_use]
    pub fn is_stale_pending(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == RentalStatus::Pending && !self.refunded && self.created_at <= cutoff
    }
}

/// Data needed to reserve a rental
#[derive(Debug, Clone)]
pub struct NewRental {
    pub user_id: String,
    pub service: String,
    pub country: String,
    pub price_kobo: i64,
}

/// Request to rent a number
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RentNumberRequest {
    #[validate(length(min = 1, max = 64, message = "Service is required"))]
    #[schema(example = "whatsapp")]
    pub service: String,
    #[validate(length(min = 1, max = 64, message = "Country is required"))]
    #[schema(example = "nigeria")]
    pub country: String,
}

/// Query for the catalog price endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PriceQuery {
    #[validate(length(min = 1, max = 64, message = "Service is required"))]
    pub service: String,
    #[validate(length(min = 1, max = 64, message = "Country is required"))]
    pub country: String,
}

/// Cheapest in-stock offer from the SMS provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOffer {
    /// Cost in the provider's currency unit
    pub cost: f64,
    /// Numbers in stock
    pub count: i64,
}

/// Retail price shown to customers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct PriceQuote {
    pub service: String,
    pub country: String,
    /// Provider cost before conversion and markup
    #[schema(example = 17.5)]
    pub provider_cost: f64,
    /// Price in kobo
    #[schema(example = 45_000)]
    pub price_kobo: i64,
    /// Numbers currently in stock
    pub available: i64,
}

/// Number issued by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderActivation {
    pub activation_id: String,
    pub phone_number: String,
}

/// Provider-side SMS state of an activation
#[derive(Debug, Clone, PartialEq)]
pub enum SmsStatus {
    Waiting,
    Received { code: String, text: Option<String> },
    /// Cancelled, banned or timed out on the provider side
    Closed,
}

/// Retail pricing parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PricingConfig {
    /// NGN per provider currency unit
    pub cost_to_ngn_rate: f64,
    /// Percentage added on top of provider cost
    pub markup_percent: f64,
    /// How long a rented number waits for an SMS
    pub rental_ttl_secs: i64,
    /// Age after which a charged rental that never got a number is refunded
    pub pending_ttl_secs: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cost_to_ngn_rate: 20.0,
            markup_percent: 30.0,
            rental_ttl_secs: 1200,
            pending_ttl_secs: 300,
        }
    }
}

impl PricingConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        use std::env;

        let defaults = Self::default();
        let cost_to_ngn_rate = env::var("SMS_COST_TO_NGN_RATE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(defaults.cost_to_ngn_rate);
        let markup_percent = env::var("PRICE_MARKUP_PERCENT")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(defaults.markup_percent);
        let rental_ttl_secs = env::var("RENTAL_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.rental_ttl_secs);
        let pending_ttl_secs = env::var("PENDING_RENTAL_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.pending_ttl_secs);

        Self {
            cost_to_ngn_rate,
            markup_percent,
            rental_ttl_secs,
            pending_ttl_secs,
        }
    }

    /// Convert a provider cost to a retail price, rounded up to a whole naira.
    ///
    /// Returns `None` for non-positive or non-finite costs.
    #[must_use]
    pub fn retail_price_kobo(&self, provider_cost: f64) -> Option<i64> {
        if !provider_cost.is_finite() || provider_cost <= 0.0 {
            return None;
        }
        // cost × rate × (1 + markup/100) naira, expressed in kobo
        let raw_kobo = provider_cost * self.cost_to_ngn_rate * (100.0 + self.markup_percent);
        // Absorb float noise before rounding up
        let kobo = (raw_kobo - 1e-6).ceil() as i64;
        Some((kobo + 99) / 100 * 100)
    }
}

/// Review state of a user refund request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RefundRequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl RefundRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for RefundRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid refund request status: {}", s)),
        }
    }
}

impl std::fmt::Display for RefundRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Complaint about a completed rental (e.g. code rejected by the service)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct RefundRequest {
    pub id: String,
    pub user_id: String,
    pub rental_id: String,
    pub reason: String,
    pub status: RefundRequestStatus,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Request body for filing a refund request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateRefundRequest {
    #[validate(length(min = 1, message = "Rental ID is required"))]
    pub rental_id: String,
    #[validate(length(min = 1, max = 500, message = "Reason must be 1-500 characters"))]
    #[schema(example = "Code was rejected by WhatsApp")]
    pub reason: String,
}

/// Query parameters for admin refund-request listings
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundRequestQuery {
    pub status: Option<RefundRequestStatus>,
    #[serde(default = "default_query_limit")]
    pub limit: i64,
    pub cursor: Option<String>,
}

fn default_query_limit() -> i64 {
    20
}

/// Result of returning a rental price to the wallet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RefundOutcome {
    Refunded {
        amount_kobo: i64,
        balance_after_kobo: i64,
    },
    /// The rental had already been refunded; nothing changed
    AlreadyRefunded,
}
