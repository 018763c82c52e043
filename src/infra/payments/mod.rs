//! Payment gateway clients and webhook signature helpers.

pub mod nowpayments;
pub mod paystack;
pub mod signature;

pub use nowpayments::{
    CRYPTO_SIGNATURE_HEADER, CryptoGatewayConfig, DEFAULT_CRYPTO_GATEWAY_URL, NowPaymentsGateway,
};
pub use paystack::{BANK_SIGNATURE_HEADER, DEFAULT_BANK_GATEWAY_URL, PaystackGateway};
