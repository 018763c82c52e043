//! Deposit, gateway event and manual payment types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::rewards::ReferralBonus;

/// Prefix of every deposit reference handed to a gateway
pub const DEPOSIT_REFERENCE_PREFIX: &str = "INS-";

/// Funding channel for a wallet deposit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    /// Bank transfer / card aggregator
    BankTransfer,
    /// Cryptocurrency invoice gateway
    Crypto,
    /// Receipt upload reviewed by an admin
    Manual,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BankTransfer => "bank_transfer",
            Self::Crypto => "crypto",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank_transfer" => Ok(Self::BankTransfer),
            "crypto" => Ok(Self::Crypto),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Invalid payment provider: {}", s)),
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a gateway deposit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Checkout created, waiting for the gateway
    #[default]
    Pending,
    /// Wallet credited
    Completed,
    /// Gateway reported failure or checkout could not be created
    Failed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid deposit status: {}", s)),
        }
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wallet funding attempt through a payment gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Deposit {
    pub id: String,
    pub user_id: String,
    pub provider: PaymentProvider,
    /// Our reference, sent to the gateway as order/transaction reference
    #[schema(example = "INS-0192F0C1A9B47D3E8F1A2B3C4D5E6001")]
    pub reference: String,
    /// Requested amount in kobo
    #[schema(example = 500_000)]
    pub amount_kobo: i64,
    /// Amount actually credited (may differ from the request for bank transfers)
    pub credited_kobo: Option<i64>,
    pub status: DepositStatus,
    /// Gateway-side identifier (invoice ID, access code)
    pub provider_reference: Option<String>,
    pub checkout_url: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Data needed to persist a new deposit
#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub user_id: String,
    pub provider: PaymentProvider,
    pub reference: String,
    pub amount_kobo: i64,
}

impl NewDeposit {
    #[must_use]
    pub fn new(user_id: String, provider: PaymentProvider, amount_kobo: i64) -> Self {
        Self {
            user_id,
            provider,
            reference: generate_deposit_reference(),
            amount_kobo,
        }
    }
}

/// Time-ordered, globally unique deposit reference
#[must_use]
pub fn generate_deposit_reference() -> String {
    format!(
        "{}{}",
        DEPOSIT_REFERENCE_PREFIX,
        Uuid::now_v7().simple().to_string().to_uppercase()
    )
}

/// Request to start a gateway deposit
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct InitiateDepositRequest {
    /// `bank_transfer` or `crypto`
    pub provider: PaymentProvider,
    /// Amount in kobo
    #[validate(range(min = 1, message = "Amount must be greater than 0"))]
    #[schema(example = 500_000)]
    pub amount_kobo: i64,
}

/// Deposit created together with the gateway checkout link
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InitiateDepositResponse {
    pub deposit: Deposit,
    #[schema(example = "https://checkout.paystack.com/0peioxfhpn")]
    pub checkout_url: String,
}

/// What a gateway needs to open a checkout session
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub reference: String,
    pub amount_kobo: i64,
    pub email: String,
    pub callback_url: String,
}

/// Gateway answer to a checkout request
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub provider_reference: Option<String>,
}

/// Normalised result carried by a gateway notification or status lookup
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome {
    /// Payment settled. `amount_kobo` is set when the gateway reports the paid amount.
    Succeeded { amount_kobo: Option<i64> },
    /// Payment definitively failed or expired
    Failed { reason: String },
    /// Still in progress on the gateway side
    Pending,
    /// Event type we do not act on
    Ignored,
}

/// Parsed, signature-verified gateway event
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub reference: String,
    pub provider_reference: Option<String>,
    pub outcome: GatewayOutcome,
}

/// Result of attempting to credit a deposit or manual payment
#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
    Credited(CreditReceipt),
    /// The payment was no longer pending; nothing changed
    AlreadyProcessed,
}

/// Details of a successful wallet credit
#[derive(Debug, Clone, PartialEq)]
pub struct CreditReceipt {
    pub user_id: String,
    pub amount_kobo: i64,
    pub balance_after_kobo: i64,
    /// Referral bonus triggered by this credit, if any
    pub referral_bonus: Option<ReferralBonus>,
}

/// How a webhook or verification call was handled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentUpdate {
    Credited,
    AlreadyProcessed,
    MarkedFailed,
    StillPending,
    Ignored,
    UnknownReference,
}

/// Response for deposit verification and webhooks
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentUpdateResponse {
    pub reference: String,
    pub result: PaymentUpdate,
}

/// Review state of a manual payment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ManualPaymentStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ManualPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ManualPaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid manual payment status: {}", s)),
        }
    }
}

impl std::fmt::Display for ManualPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User-submitted payment claim awaiting admin review
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ManualPayment {
    pub id: String,
    pub user_id: String,
    #[schema(example = 1_000_000)]
    pub amount_kobo: i64,
    #[schema(example = "https://storage.example.com/receipts/abc.jpg")]
    pub receipt_url: String,
    pub sender_name: String,
    pub note: Option<String>,
    pub status: ManualPaymentStatus,
    pub reviewed_by: Option<String>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Request body for a manual payment claim
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SubmitManualPaymentRequest {
    #[validate(range(min = 1, message = "Amount must be greater than 0"))]
    #[schema(example = 1_000_000)]
    pub amount_kobo: i64,
    #[validate(url(message = "Receipt URL must be a valid URL"))]
    #[schema(example = "https://storage.example.com/receipts/abc.jpg")]
    pub receipt_url: String,
    /// Name on the sending bank account
    #[validate(length(min = 1, max = 128, message = "Sender name must be 1-128 characters"))]
    pub sender_name: String,
    #[validate(length(max = 500, message = "Note must be at most 500 characters"))]
    pub note: Option<String>,
}

/// Data needed to persist a manual payment
#[derive(Debug, Clone)]
pub struct NewManualPayment {
    pub user_id: String,
    pub amount_kobo: i64,
    pub receipt_url: String,
    pub sender_name: String,
    pub note: Option<String>,
}

/// Admin decision note for approve / reject endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ReviewRequest {
    /// Required when rejecting
    pub note: Option<String>,
}

/// Query parameters for admin manual-payment listings
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ManualPaymentQuery {
    pub status: Option<ManualPaymentStatus>,
    #[serde(default = "default_query_limit")]
    pub limit: i64,
    pub cursor: Option<String>,
}

fn default_query_limit() -> i64 {
    20
}
