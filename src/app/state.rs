//! Application state management.

use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    DatabaseClient, Notifier, PaymentGateway, PricingConfig, RewardsConfig, SmsProvider,
};
use crate::infra::PriceCache;

use super::payment_service::{PaymentConfig, PaymentService};
use super::refund_service::RefundService;
use super::rental_service::RentalService;
use super::service::AppService;

/// Business rules shared by the services
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub rewards: RewardsConfig,
    pub pricing: PricingConfig,
    pub payments: PaymentConfig,
    pub price_cache_ttl: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            rewards: RewardsConfig::default(),
            pricing: PricingConfig::default(),
            payments: PaymentConfig::default(),
            price_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl ServiceSettings {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let price_cache_ttl = std::env::var("PRICE_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        Self {
            rewards: RewardsConfig::from_env(),
            pricing: PricingConfig::from_env(),
            payments: PaymentConfig::from_env(),
            price_cache_ttl,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AppService>,
    pub payments: Arc<PaymentService>,
    pub rentals: Arc<RentalService>,
    pub refunds: Arc<RefundService>,
    pub db_client: Arc<dyn DatabaseClient>,
    /// `X-Admin-Key` value. Admin routes are disabled when unset.
    pub admin_api_key: Option<SecretString>,
}

impl AppState {
    /// Wire the services over their dependencies
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        sms_provider: Arc<dyn SmsProvider>,
        gateways: Vec<Arc<dyn PaymentGateway>>,
        notifier: Arc<dyn Notifier>,
        settings: ServiceSettings,
    ) -> Self {
        let service = Arc::new(AppService::new(
            Arc::clone(&db_client),
            Arc::clone(&sms_provider),
            gateways.clone(),
            Arc::clone(&notifier),
            settings.rewards.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            Arc::clone(&db_client),
            gateways,
            notifier,
            settings.rewards.clone(),
            settings.payments,
        ));
        let refunds = Arc::new(RefundService::new(Arc::clone(&db_client)));
        let rentals = Arc::new(RentalService::new(
            Arc::clone(&db_client),
            sms_provider,
            Arc::clone(&refunds),
            PriceCache::new(settings.price_cache_ttl),
            settings.pricing,
            settings.rewards,
        ));

        Self {
            service,
            payments,
            rentals,
            refunds,
            db_client,
            admin_api_key: None,
        }
    }

    /// Enable the admin API (builder pattern)
    #[must_use]
    pub fn with_admin_key(mut self, admin_api_key: SecretString) -> Self {
        self.admin_api_key = Some(admin_api_key);
        self
    }
}
