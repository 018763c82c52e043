//! InstantNums backend: wallet funding, SMS number rentals, refunds and rewards.
//!
//! The crate is layered the usual way:
//! - [`domain`]: types, traits and errors with no I/O
//! - [`app`]: business services and shared state
//! - [`infra`]: Postgres, SMS provider, payment gateways and email adapters
//! - [`api`]: axum handlers, extractors and routing

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
