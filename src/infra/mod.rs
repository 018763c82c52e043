//! Infrastructure layer implementations.

pub mod database;
pub mod email;
pub mod payments;
pub mod sms;

pub use database::{PostgresClient, PostgresConfig};
pub use email::ResendNotifier;
pub use payments::{CryptoGatewayConfig, NowPaymentsGateway, PaystackGateway};
pub use sms::{FiveSimProvider, PriceCache};
