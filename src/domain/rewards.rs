//! Referral bonus and loyalty point rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Referral and loyalty parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RewardsConfig {
    /// Bonus credited to the referrer
    pub referral_bonus_kobo: i64,
    /// Cumulative deposits the referee must reach
    pub referral_threshold_kobo: i64,
    /// Rental spend needed to earn one point
    pub kobo_per_point_earned: i64,
    /// Wallet credit per redeemed point
    pub point_value_kobo: i64,
    /// Smallest redemption accepted
    pub min_redemption_points: i64,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            referral_bonus_kobo: 50_000,      // ₦500
            referral_threshold_kobo: 500_000, // ₦5,000
            kobo_per_point_earned: 10_000,    // ₦100 spent = 1 point
            point_value_kobo: 100,            // 1 point = ₦1
            min_redemption_points: 100,
        }
    }
}

impl RewardsConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        use std::env;

        let defaults = Self::default();
        let read = |key: &str, default: i64| {
            env::var(key)
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        Self {
            referral_bonus_kobo: read("REFERRAL_BONUS_KOBO", defaults.referral_bonus_kobo),
            referral_threshold_kobo: read(
                "REFERRAL_THRESHOLD_KOBO",
                defaults.referral_threshold_kobo,
            ),
            kobo_per_point_earned: read(
                "LOYALTY_KOBO_PER_POINT_EARNED",
                defaults.kobo_per_point_earned,
            ),
            point_value_kobo: read("LOYALTY_POINT_VALUE_KOBO", defaults.point_value_kobo),
            min_redemption_points: read(
                "LOYALTY_MIN_REDEMPTION",
                defaults.min_redemption_points,
            ),
        }
    }

    /// Whether a referee's deposit total unlocks the referrer's bonus.
    #[must_use]
    pub fn referral_bonus_due(
        &self,
        referred_by: Option<&str>,
        bonus_already_paid: bool,
        total_deposited_kobo: i64,
    ) -> bool {
        referred_by.is_some()
            && !bonus_already_paid
            && total_deposited_kobo >= self.referral_threshold_kobo
    }

    /// Points earned for a completed rental. Fractions are dropped.
    #[must_use]
    pub fn points_for_spend(&self, spent_kobo: i64) -> i64 {
        if spent_kobo <= 0 {
            return 0;
        }
        spent_kobo / self.kobo_per_point_earned
    }

    /// Wallet credit for redeeming `points`.
    #[must_use]
    pub fn redemption_value(&self, points: i64) -> i64 {
        points.saturating_mul(self.point_value_kobo)
    }
}

/// Bonus paid to a referrer inside a deposit credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReferralBonus {
    pub referrer_id: String,
    pub referee_id: String,
    pub amount_kobo: i64,
}

/// A user brought in with the caller's code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReferredUser {
    pub user_id: String,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    pub bonus_paid: bool,
}

/// Referral dashboard for the current user
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReferralSummary {
    #[schema(example = "K7Q2M9XA")]
    pub referral_code: String,
    pub referred_users: Vec<ReferredUser>,
    pub total_bonus_kobo: i64,
    /// Deposit total a referee needs for the bonus
    pub threshold_kobo: i64,
    pub bonus_kobo: i64,
}

/// Request to convert loyalty points to wallet credit
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RedeemPointsRequest {
    #[validate(range(min = 1, message = "Points must be greater than 0"))]
    #[schema(example = 250)]
    pub points: i64,
}

/// Outcome of a loyalty redemption
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct RedemptionResult {
    pub points_redeemed: i64,
    pub credited_kobo: i64,
    pub remaining_points: i64,
    pub balance_after_kobo: i64,
}
