//! Application entry point.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use instantnums_backend::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use instantnums_backend::app::{AppState, ServiceSettings, SweeperConfig, spawn_sweeper};
use instantnums_backend::domain::PaymentGateway;
use instantnums_backend::infra::{
    CryptoGatewayConfig, FiveSimProvider, NowPaymentsGateway, PaystackGateway, PostgresClient,
    PostgresConfig, ResendNotifier,
};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    enable_rate_limiting: bool,
    rate_limit_config: RateLimitConfig,
    /// `X-Admin-Key` value. The admin API is disabled when unset.
    admin_api_key: Option<SecretString>,
    /// SMS provider token (optional - uses mock mode if not set)
    sms_api_key: Option<SecretString>,
    sms_api_url: Option<String>,
    /// Bank gateway secret, used for API calls and webhook signatures
    bank_gateway_secret: Option<SecretString>,
    bank_gateway_url: Option<String>,
    crypto_gateway: CryptoGatewayConfig,
    email_api_key: Option<SecretString>,
    email_api_url: Option<String>,
    email_from: Option<String>,
    settings: ServiceSettings,
    sweeper_config: SweeperConfig,
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn optional_secret(key: &str) -> Option<SecretString> {
    optional(key).map(SecretString::from)
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let enable_rate_limiting = env::var("ENABLE_RATE_LIMITING")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let rate_limit_config = RateLimitConfig::from_env();

        let settings = ServiceSettings::from_env();

        let usd_to_ngn_rate = match optional("USD_TO_NGN_RATE") {
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|rate| *rate > 0.0)
                .with_context(|| format!("USD_TO_NGN_RATE must be a positive number, got {raw}"))?,
            None => CryptoGatewayConfig::default().usd_to_ngn_rate,
        };
        let crypto_gateway = CryptoGatewayConfig {
            api_key: optional_secret("CRYPTO_GATEWAY_API_KEY"),
            ipn_secret: optional_secret("CRYPTO_GATEWAY_IPN_SECRET"),
            base_url: optional("CRYPTO_GATEWAY_URL"),
            usd_to_ngn_rate,
            ipn_callback_url: Some(format!(
                "{}/webhooks/crypto",
                settings.payments.public_base_url
            )),
        };

        Ok(Self {
            database_url,
            host,
            port,
            enable_rate_limiting,
            rate_limit_config,
            admin_api_key: optional_secret("ADMIN_API_KEY"),
            sms_api_key: optional_secret("SMS_API_KEY"),
            sms_api_url: optional("SMS_API_URL"),
            bank_gateway_secret: optional_secret("BANK_GATEWAY_SECRET"),
            bank_gateway_url: optional("BANK_GATEWAY_URL"),
            crypto_gateway,
            email_api_key: optional_secret("EMAIL_API_KEY"),
            email_api_url: optional("EMAIL_API_URL"),
            email_from: optional("EMAIL_FROM"),
            settings,
            sweeper_config: SweeperConfig::from_env(),
        })
    }
}

/// `LOG_FORMAT=json` switches to one JSON object per line
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("📱 InstantNums backend v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    let postgres_client = PostgresClient::new(&config.database_url, PostgresConfig::default()).await?;
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    let sms_provider = FiveSimProvider::new(config.sms_api_key.clone(), config.sms_api_url.clone());
    if sms_provider.is_mock_mode() {
        warn!("   ⚠ SMS provider created (MOCK MODE - no SMS_API_KEY)");
    } else {
        info!("   ✓ SMS provider created");
    }

    let bank_gateway = PaystackGateway::new(
        config.bank_gateway_secret.clone(),
        config.bank_gateway_url.clone(),
    );
    if bank_gateway.is_mock_mode() {
        warn!("   ⚠ Bank transfer gateway in MOCK MODE (webhooks will be rejected)");
    } else {
        info!("   ✓ Bank transfer gateway configured");
    }

    let crypto_gateway = NowPaymentsGateway::new(config.crypto_gateway.clone());
    if crypto_gateway.is_mock_mode() {
        warn!("   ⚠ Crypto gateway in MOCK MODE (webhooks will be rejected)");
    } else {
        info!(
            "   ✓ Crypto gateway configured ({} NGN/USD)",
            config.crypto_gateway.usd_to_ngn_rate
        );
    }

    let notifier = ResendNotifier::new(
        config.email_api_key.clone(),
        config.email_api_url.clone(),
        config.email_from.clone(),
    );
    if notifier.is_mock_mode() {
        info!("   ○ Email disabled (no EMAIL_API_KEY), messages are logged only");
    } else {
        info!("   ✓ Email notifier configured");
    }

    let gateways = vec![
        Arc::new(bank_gateway) as Arc<dyn PaymentGateway>,
        Arc::new(crypto_gateway) as Arc<dyn PaymentGateway>,
    ];

    let app_state = AppState::new(
        Arc::new(postgres_client),
        Arc::new(sms_provider),
        gateways,
        Arc::new(notifier),
        config.settings.clone(),
    );
    let app_state = match config.admin_api_key.clone() {
        Some(key) => {
            info!("   ✓ Admin API enabled");
            app_state.with_admin_key(key)
        }
        None => {
            warn!("   ⚠ Admin API disabled (no ADMIN_API_KEY)");
            app_state
        }
    };
    let app_state = Arc::new(app_state);

    let sweeper_shutdown_tx = if config.sweeper_config.enabled {
        let (_sweeper_handle, shutdown_tx) = spawn_sweeper(
            Arc::clone(&app_state.rentals),
            config.sweeper_config.clone(),
        );
        info!(
            "   ✓ Rental sweeper started (poll: {:?}, batch: {})",
            config.sweeper_config.poll_interval, config.sweeper_config.batch_size
        );
        Some(shutdown_tx)
    } else {
        info!("   ○ Rental sweeper disabled");
        None
    };

    let router = if config.enable_rate_limiting {
        info!("   ✓ Rate limiting enabled");
        create_router_with_rate_limit(app_state, config.rate_limit_config)
    } else {
        info!("   ○ Rate limiting disabled");
        create_router(app_state)
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(tx) = sweeper_shutdown_tx {
        let _ = tx.send(true);
    }

    info!("Server shutdown complete");
    Ok(())
}
