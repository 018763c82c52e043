//! Background sweeper that expires rentals which never received an SMS
//! and refunds charges whose number purchase never completed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::rental_service::RentalService;

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(30),
            batch_size: 50,
        }
    }
}

impl SweeperConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        use std::env;

        let defaults = Self::default();
        let enabled = env::var("ENABLE_BACKGROUND_WORKER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.enabled);
        let poll_interval = env::var("SWEEPER_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);
        let batch_size = env::var("SWEEPER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.batch_size);

        Self {
            enabled,
            poll_interval,
            batch_size,
        }
    }
}

/// Periodically refunds overdue rentals
pub struct RentalSweeper {
    service: Arc<RentalService>,
    config: SweeperConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl RentalSweeper {
    #[must_use]
    pub fn new(
        service: Arc<RentalService>,
        config: SweeperConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            config,
            shutdown_rx,
        }
    }

    /// Run until the shutdown signal flips to `true`
    pub async fn run(mut self) {
        if !self.config.enabled {
            info!("Rental sweeper is disabled");
            return;
        }

        info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = %self.config.batch_size,
            "Rental sweeper started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.service.sweep_overdue(self.config.batch_size).await {
                        Ok(0) => {}
                        Ok(count) => info!(count = count, "Sweeper cycle complete"),
                        Err(e) => error!(error = ?e, "Sweeper cycle failed"),
                    }
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Rental sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Spawn the sweeper, returning its handle and shutdown sender
pub fn spawn_sweeper(
    service: Arc<RentalService>,
    config: SweeperConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = RentalSweeper::new(service, config, shutdown_rx);
    let handle = tokio::spawn(sweeper.run());
    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::RefundService;
    use crate::domain::{
        DatabaseClient, NewUser, PricingConfig, RentNumberRequest, RentalStatus, RewardsConfig,
        User,
    };
    use crate::infra::PriceCache;
    use crate::test_utils::{MockDatabaseClient, MockSmsProvider};
    use chrono::Utc;
    use tokio_test::assert_ok;

    async fn setup() -> (Arc<MockDatabaseClient>, Arc<RentalService>, User) {
        let db = Arc::new(MockDatabaseClient::new());
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
        db.set_balance(&user.id, 100_000);

        let service = Arc::new(RentalService::new(
            db.clone(),
            Arc::new(MockSmsProvider::new()),
            Arc::new(RefundService::new(db.clone())),
            PriceCache::new(Duration::from_secs(60)),
            PricingConfig::default(),
            RewardsConfig::default(),
        ));
        (db, service, user)
    }

    fn fast_config() -> SweeperConfig {
        SweeperConfig {
            enabled: true,
            poll_interval: Duration::from_millis(20),
            batch_size: 10,
        }
    }

    #[test]
    fn test_sweeper_config_default() {
        let config = SweeperConfig::default();
        assert!(config.enabled);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 50);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_refunds_then_shuts_down() {
        let (db, service, user) = setup().await;
        let rental = service
            .rent_number(
                &user,
                &RentNumberRequest {
                    service: "whatsapp".to_string(),
                    country: "nigeria".to_string(),
                },
            )
            .await
            .unwrap();
        db.set_rental_expiry(&rental.id, Utc::now() - chrono::Duration::seconds(5));

        let (handle, shutdown_tx) = spawn_sweeper(service, fast_config());

        let swept = tokio::time::timeout(Duration::from_secs(2), async {
            while !db.all_rentals()[0].refunded {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert_ok!(swept);
        assert_eq!(db.all_rentals()[0].status, RentalStatus::Expired);
        assert_eq!(db.get_user_now(&user.id).unwrap().balance_kobo, 100_000);

        shutdown_tx.send(true).unwrap();
        let joined = assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await);
        assert_ok!(joined);
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_sender_dropped() {
        let (_db, service, _user) = setup().await;
        let (handle, shutdown_tx) = spawn_sweeper(service, fast_config());
        drop(shutdown_tx);

        let joined = assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await);
        assert_ok!(joined);
    }

    #[tokio::test]
    async fn test_disabled_sweeper_exits_immediately() {
        let (_db, service, _user) = setup().await;
        let config = SweeperConfig {
            enabled: false,
            ..fast_config()
        };
        let (handle, _shutdown_tx) = spawn_sweeper(service, config);

        let joined = assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await);
        assert_ok!(joined);
    }
}
