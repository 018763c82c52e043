//! SMS number rental providers.

pub mod fivesim;
pub mod price_cache;

pub use fivesim::{DEFAULT_SMS_API_URL, FiveSimProvider};
pub use price_cache::PriceCache;
