//! Number rentals: pricing, purchase, SMS polling, cancellation and expiry.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use super::refund_service::RefundService;
use crate::domain::{
    AppError, DatabaseClient, DatabaseError, ExternalServiceError, NewRental, PaginatedResponse,
    PriceQuote, PricingConfig, ProviderOffer, Rental, RentNumberRequest, RentalStatus,
    RewardsConfig, SmsProvider, SmsStatus, User,
};
use crate::infra::PriceCache;

/// Rental service
pub struct RentalService {
    db_client: Arc<dyn DatabaseClient>,
    sms_provider: Arc<dyn SmsProvider>,
    refunds: Arc<RefundService>,
    price_cache: PriceCache,
    pricing: PricingConfig,
    rewards: RewardsConfig,
}

impl RentalService {
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        sms_provider: Arc<dyn SmsProvider>,
        refunds: Arc<RefundService>,
        price_cache: PriceCache,
        pricing: PricingConfig,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            db_client,
            sms_provider,
            refunds,
            price_cache,
            pricing,
            rewards,
        }
    }

    fn normalize(value: &str) -> String {
        value.trim().to_lowercase()
    }

    async fn offer(&self, service: &str, country: &str) -> Result<Option<ProviderOffer>, AppError> {
        if let Some(cached) = self.price_cache.get(service, country) {
            return Ok(cached);
        }
        let offer = self.sms_provider.get_offer(service, country).await?;
        self.price_cache.insert(service, country, offer.clone());
        Ok(offer)
    }

    /// Retail price of a number for `service` in `country`
    #[instrument(skip(self))]
    pub async fn quote(&self, service: &str, country: &str) -> Result<PriceQuote, AppError> {
        let service = Self::normalize(service);
        let country = Self::normalize(country);

        let unavailable = || {
            AppError::ExternalService(ExternalServiceError::Unavailable(format!(
                "No numbers available for {} in {}",
                service, country
            )))
        };

        let offer = self
            .offer(&service, &country)
            .await?
            .ok_or_else(unavailable)?;
        let price_kobo = self
            .pricing
            .retail_price_kobo(offer.cost)
            .ok_or_else(unavailable)?;

        Ok(PriceQuote {
            service: service.clone(),
            country: country.clone(),
            provider_cost: offer.cost,
            price_kobo,
            available: offer.count,
        })
    }

    /// Charge the wallet and buy a number
    #[instrument(skip(self, user, request), fields(user_id = %user.id, service = %request.service, country = %request.country))]
    pub async fn rent_number(
        &self,
        user: &User,
        request: &RentNumberRequest,
    ) -> Result<Rental, AppError> {
        request.validate()?;
        let quote = self.quote(&request.service, &request.country).await?;

        let rental = self
            .db_client
            .reserve_rental(&NewRental {
                user_id: user.id.clone(),
                service: quote.service.clone(),
                country: quote.country.clone(),
                price_kobo: quote.price_kobo,
            })
            .await?;

        let activation = match self
            .sms_provider
            .purchase_number(&quote.service, &quote.country)
            .await
        {
            Ok(activation) => activation,
            Err(e) => {
                warn!(rental_id = %rental.id, error = %e, "Number purchase failed, refunding");
                self.price_cache.invalidate(&quote.service, &quote.country);
                self.refunds
                    .refund_rental(
                        &rental.id,
                        Some(RentalStatus::Failed),
                        "Refund: number purchase failed",
                    )
                    .await?;
                return Err(e);
            }
        };

        let expires_at = Utc::now() + Duration::seconds(self.pricing.rental_ttl_secs);
        match self
            .db_client
            .activate_rental(&rental.id, &activation, expires_at)
            .await
        {
            Ok(active) => {
                info!(
                    rental_id = %active.id,
                    activation_id = %activation.activation_id,
                    price = %active.price_kobo,
                    "Number rented"
                );
                Ok(active)
            }
            Err(e) => {
                error!(rental_id = %rental.id, error = %e, "Failed to record activation");
                if let Err(cancel_err) = self
                    .sms_provider
                    .cancel_activation(&activation.activation_id)
                    .await
                {
                    warn!(error = %cancel_err, "Provider cancel failed");
                }
                self.refunds
                    .refund_rental(
                        &rental.id,
                        Some(RentalStatus::Failed),
                        "Refund: activation could not be recorded",
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// A rental owned by `user`; other users' rentals look absent
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn get_rental(&self, user: &User, id: &str) -> Result<Rental, AppError> {
        self.db_client
            .get_rental(id)
            .await?
            .filter(|r| r.user_id == user.id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("Rental {}", id))))
    }

    #[instrument(skip(self))]
    pub async fn list_rentals(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Rental>, AppError> {
        self.db_client.list_rentals(user_id, limit, cursor).await
    }

    /// Poll the provider for the code of an active rental
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn check_sms(&self, user: &User, id: &str) -> Result<Rental, AppError> {
        let rental = self.get_rental(user, id).await?;
        if rental.status != RentalStatus::Active {
            return Ok(rental);
        }
        let Some(activation_id) = rental.activation_id.clone() else {
            return Ok(rental);
        };

        match self.sms_provider.check_sms(&activation_id).await? {
            SmsStatus::Received { code, text } => {
                self.record_code(&rental, &activation_id, &code, text.as_deref())
                    .await?;
            }
            SmsStatus::Closed => {
                info!(rental_id = %rental.id, "Provider closed the activation, refunding");
                self.refunds
                    .refund_rental(
                        &rental.id,
                        Some(RentalStatus::Expired),
                        "Refund: number closed without SMS",
                    )
                    .await?;
            }
            SmsStatus::Waiting if rental.is_overdue(Utc::now()) => {
                self.expire(&rental, &activation_id).await?;
            }
            SmsStatus::Waiting => return Ok(rental),
        }

        self.get_rental(user, id).await
    }

    /// Release an unused number and refund it
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn cancel_rental(&self, user: &User, id: &str) -> Result<Rental, AppError> {
        let rental = self.get_rental(user, id).await?;
        if rental.status != RentalStatus::Active || rental.sms_code.is_some() {
            return Err(AppError::InvalidState(format!(
                "Only active rentals without a code can be cancelled (rental is {})",
                rental.status
            )));
        }

        if let Some(activation_id) = &rental.activation_id
            && let Err(e) = self.sms_provider.cancel_activation(activation_id).await
        {
            warn!(rental_id = %rental.id, error = %e, "Provider cancel failed, refunding anyway");
        }

        self.refunds
            .refund_rental(
                &rental.id,
                Some(RentalStatus::Cancelled),
                "Refund: rental cancelled",
            )
            .await?;

        self.get_rental(user, id).await
    }

    /// Expire overdue rentals and refund charges that never got a number.
    /// Returns how many were handled.
    #[instrument(skip(self))]
    pub async fn sweep_overdue(&self, batch_size: i64) -> Result<usize, AppError> {
        let now = Utc::now();
        let pending_before = now - Duration::seconds(self.pricing.pending_ttl_secs);
        let overdue = self
            .db_client
            .get_overdue_rentals(now, pending_before, batch_size)
            .await?;
        let count = overdue.len();
        if count == 0 {
            return Ok(0);
        }

        info!(count = count, "Sweeping overdue rentals");
        for rental in overdue {
            if let Err(e) = self.sweep_one(&rental).await {
                error!(rental_id = %rental.id, error = ?e, "Failed to sweep rental");
            }
        }
        Ok(count)
    }

    async fn sweep_one(&self, rental: &Rental) -> Result<(), AppError> {
        let Some(activation_id) = rental.activation_id.clone() else {
            warn!(rental_id = %rental.id, "Rental never received a number, refunding");
            self.refunds
                .refund_rental(
                    &rental.id,
                    Some(RentalStatus::Failed),
                    "Refund: number purchase did not complete",
                )
                .await?;
            return Ok(());
        };

        // Last look for a code that arrived just before the deadline
        match self.sms_provider.check_sms(&activation_id).await {
            Ok(SmsStatus::Received { code, text }) => {
                self.record_code(rental, &activation_id, &code, text.as_deref())
                    .await
            }
            Ok(_) => self.expire(rental, &activation_id).await,
            Err(e) => {
                warn!(rental_id = %rental.id, error = %e, "Final SMS check failed, expiring");
                self.expire(rental, &activation_id).await
            }
        }
    }

    async fn record_code(
        &self,
        rental: &Rental,
        activation_id: &str,
        code: &str,
        text: Option<&str>,
    ) -> Result<(), AppError> {
        let points = self.rewards.points_for_spend(rental.price_kobo);
        match self
            .db_client
            .complete_rental(&rental.id, code, text, points)
            .await?
        {
            Some(_) => {
                info!(rental_id = %rental.id, points = %points, "SMS code received");
                if let Err(e) = self.sms_provider.finish_activation(activation_id).await {
                    warn!(rental_id = %rental.id, error = %e, "Provider finish failed");
                }
            }
            None => warn!(rental_id = %rental.id, "Rental was no longer active"),
        }
        Ok(())
    }

    async fn expire(&self, rental: &Rental, activation_id: &str) -> Result<(), AppError> {
        if let Err(e) = self.sms_provider.cancel_activation(activation_id).await {
            warn!(rental_id = %rental.id, error = %e, "Provider cancel failed");
        }
        self.refunds
            .refund_rental(
                &rental.id,
                Some(RentalStatus::Expired),
                "Refund: number expired without SMS",
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewUser, TransactionKind};
    use crate::test_utils::{MockDatabaseClient, MockSmsProvider};

    struct Fixture {
        db: Arc<MockDatabaseClient>,
        sms: Arc<MockSmsProvider>,
        service: RentalService,
        user: User,
    }

    async fn fixture(balance_kobo: i64) -> Fixture {
        let db = Arc::new(MockDatabaseClient::new());
        let sms = Arc::new(MockSmsProvider::new());
        let user = db
            .create_user(&NewUser {
                email: "ada@example.com".to_string(),
                display_name: "Ada".to_string(),
                referral_code: "ADA00001".to_string(),
                referred_by: None,
                api_token_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        db.set_balance(&user.id, balance_kobo);

        let refunds = Arc::new(RefundService::new(db.clone()));
        let service = RentalService::new(
            db.clone(),
            sms.clone(),
            refunds,
            PriceCache::new(std::time::Duration::from_secs(60)),
            PricingConfig::default(),
            RewardsConfig::default(),
        );
        Fixture {
            db,
            sms,
            service,
            user,
        }
    }

    fn whatsapp() -> RentNumberRequest {
        RentNumberRequest {
            service: "whatsapp".to_string(),
            country: "nigeria".to_string(),
        }
    }

    #[tokio::test]
    async fn test_quote_normalizes_and_prices() {
        let f = fixture(0).await;
        let quote = f.service.quote(" WhatsApp ", "Nigeria").await.unwrap();
        assert_eq!(quote.service, "whatsapp");
        assert_eq!(quote.country, "nigeria");
        // 15 units × ₦20 × 1.30
        assert_eq!(quote.price_kobo, 39_000);
        assert_eq!(quote.available, 100);
    }

    #[tokio::test]
    async fn test_quote_without_stock() {
        let f = fixture(0).await;
        f.sms.set_offer(None);
        let result = f.service.quote("whatsapp", "nigeria").await;
        assert!(matches!(
            result,
            Err(AppError::ExternalService(ExternalServiceError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_rent_number_debits_and_activates() {
        let f = fixture(100_000).await;
        let rental = f.service.rent_number(&f.user, &whatsapp()).await.unwrap();

        assert_eq!(rental.status, RentalStatus::Active);
        assert_eq!(rental.price_kobo, 39_000);
        assert_eq!(rental.activation_id.as_deref(), Some("act-1"));
        assert!(rental.phone_number.is_some());
        assert!(rental.expires_at.is_some());

        let user = f.db.get_user_now(&f.user.id).unwrap();
        assert_eq!(user.balance_kobo, 61_000);
        let ledger = f.db.transactions_for(&f.user.id);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, TransactionKind::RentalDebit);
        assert_eq!(ledger[0].amount_kobo, -39_000);
    }

    #[tokio::test]
    async fn test_rent_number_insufficient_funds() {
        let f = fixture(1_000).await;
        let result = f.service.rent_number(&f.user, &whatsapp()).await;
        assert!(matches!(
            result,
            Err(AppError::InsufficientFunds {
                required: 39_000,
                available: 1_000
            })
        ));
        assert!(f.sms.purchases().is_empty());
        assert!(f.db.all_rentals().is_empty());
    }

    #[tokio::test]
    async fn test_purchase_failure_refunds() {
        let f = fixture(100_000).await;
        f.sms.set_purchase_fails(true);

        let result = f.service.rent_number(&f.user, &whatsapp()).await;
        assert!(matches!(result, Err(AppError::ExternalService(_))));

        let rentals = f.db.all_rentals();
        assert_eq!(rentals.len(), 1);
        assert_eq!(rentals[0].status, RentalStatus::Failed);
        assert!(rentals[0].refunded);
        assert_eq!(f.db.get_user_now(&f.user.id).unwrap().balance_kobo, 100_000);
    }

    #[tokio::test]
    async fn test_check_sms_records_code_and_points() {
        let f = fixture(100_000).await;
        let rental = f.service.rent_number(&f.user, &whatsapp()).await.unwrap();

        let waiting = f.service.check_sms(&f.user, &rental.id).await.unwrap();
        assert_eq!(waiting.status, RentalStatus::Active);

        f.sms.set_sms_status(SmsStatus::Received {
            code: "482913".to_string(),
            text: Some("Your WhatsApp code is 482-913".to_string()),
        });
        let done = f.service.check_sms(&f.user, &rental.id).await.unwrap();
        assert_eq!(done.status, RentalStatus::Completed);
        assert_eq!(done.sms_code.as_deref(), Some("482913"));
        assert!(!done.refunded);
        assert_eq!(f.sms.finished(), vec!["act-1".to_string()]);

        let user = f.db.get_user_now(&f.user.id).unwrap();
        assert_eq!(user.total_spent_kobo, 39_000);
        assert_eq!(user.loyalty_points, 3);
        assert_eq!(user.balance_kobo, 61_000);
    }

    #[tokio::test]
    async fn test_check_sms_closed_refunds() {
        let f = fixture(100_000).await;
        let rental = f.service.rent_number(&f.user, &whatsapp()).await.unwrap();

        f.sms.set_sms_status(SmsStatus::Closed);
        let closed = f.service.check_sms(&f.user, &rental.id).await.unwrap();
        assert_eq!(closed.status, RentalStatus::Expired);
        assert!(closed.refunded);
        assert_eq!(f.db.get_user_now(&f.user.id).unwrap().balance_kobo, 100_000);
    }

    #[tokio::test]
    async fn test_cancel_rental_once() {
        let f = fixture(100_000).await;
        let rental = f.service.rent_number(&f.user, &whatsapp()).await.unwrap();

        let cancelled = f.service.cancel_rental(&f.user, &rental.id).await.unwrap();
        assert_eq!(cancelled.status, RentalStatus::Cancelled);
        assert!(cancelled.refunded);
        assert_eq!(f.sms.cancelled(), vec!["act-1".to_string()]);

        let again = f.service.cancel_rental(&f.user, &rental.id).await;
        assert!(matches!(again, Err(AppError::InvalidState(_))));
        assert_eq!(f.db.get_user_now(&f.user.id).unwrap().balance_kobo, 100_000);
    }

    #[tokio::test]
    async fn test_cancel_after_code_rejected() {
        let f = fixture(100_000).await;
        let rental = f.service.rent_number(&f.user, &whatsapp()).await.unwrap();
        f.sms.set_sms_status(SmsStatus::Received {
            code: "1111".to_string(),
            text: None,
        });
        f.service.check_sms(&f.user, &rental.id).await.unwrap();

        let result = f.service.cancel_rental(&f.user, &rental.id).await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
        assert_eq!(f.db.get_user_now(&f.user.id).unwrap().balance_kobo, 61_000);
    }

    #[tokio::test]
    async fn test_sweep_expires_overdue_rentals() {
        let f = fixture(100_000).await;
        let rental = f.service.rent_number(&f.user, &whatsapp()).await.unwrap();
        f.db
            .set_rental_expiry(&rental.id, Utc::now() - Duration::seconds(5));

        assert_eq!(f.service.sweep_overdue(10).await.unwrap(), 1);
        let swept = f.service.get_rental(&f.user, &rental.id).await.unwrap();
        assert_eq!(swept.status, RentalStatus::Expired);
        assert!(swept.refunded);
        assert_eq!(f.db.get_user_now(&f.user.id).unwrap().balance_kobo, 100_000);

        assert_eq!(f.service.sweep_overdue(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_refunds_stuck_pending_rental() {
        let f = fixture(100_000).await;
        let rental = f
            .db
            .reserve_rental(&NewRental {
                user_id: f.user.id.clone(),
                service: "whatsapp".to_string(),
                country: "nigeria".to_string(),
                price_kobo: 40_000,
            })
            .await
            .unwrap();
        assert_eq!(f.db.get_user_now(&f.user.id).unwrap().balance_kobo, 60_000);

        // Still inside the purchase window
        assert_eq!(f.service.sweep_overdue(50).await.unwrap(), 0);

        f.db
            .set_rental_created_at(&rental.id, Utc::now() - Duration::minutes(10));
        assert_eq!(f.service.sweep_overdue(50).await.unwrap(), 1);

        let swept = f.service.get_rental(&f.user, &rental.id).await.unwrap();
        assert_eq!(swept.status, RentalStatus::Failed);
        assert!(swept.refunded);
        assert_eq!(f.db.get_user_now(&f.user.id).unwrap().balance_kobo, 100_000);
        assert!(f.sms.cancelled().is_empty());

        let kinds: Vec<_> = f
            .db
            .transactions_for(&f.user.id)
            .iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            kinds.iter().filter(|k| **k == TransactionKind::RentalRefund).count(),
            1
        );
        assert_eq!(f.service.sweep_overdue(50).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_late_code() {
        let f = fixture(100_000).await;
        let rental = f.service.rent_number(&f.user, &whatsapp()).await.unwrap();
        f.db
            .set_rental_expiry(&rental.id, Utc::now() - Duration::seconds(5));
        f.sms.set_sms_status(SmsStatus::Received {
            code: "777777".to_string(),
            text: None,
        });

        f.service.sweep_overdue(10).await.unwrap();
        let swept = f.service.get_rental(&f.user, &rental.id).await.unwrap();
        assert_eq!(swept.status, RentalStatus::Completed);
        assert!(!swept.refunded);
        assert!(f.sms.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_other_users_rental_not_found() {
        let f = fixture(100_000).await;
        let rental = f.service.rent_number(&f.user, &whatsapp()).await.unwrap();

        let mut stranger = f.user.clone();
        stranger.id = "someone-else".to_string();
        let result = f.service.get_rental(&stranger, &rental.id).await;
        assert!(matches!(
            result,
            Err(AppError::Database(DatabaseError::NotFound(_)))
        ));
    }
}
