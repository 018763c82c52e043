//! Test utilities: in-memory mocks for every domain trait.

pub mod mocks;

pub use mocks::{
    MockConfig, MockDatabaseClient, MockNotifier, MockPaymentGateway, MockSmsProvider,
    MockWebhookEvent,
};
