//! Application layer containing business logic and shared state.

pub mod credentials;
pub mod payment_service;
pub mod refund_service;
pub mod rental_service;
pub mod service;
pub mod state;
pub mod worker;

pub use payment_service::{ADMIN_REVIEWER, PaymentConfig, PaymentService};
pub use refund_service::RefundService;
pub use rental_service::RentalService;
pub use service::AppService;
pub use state::{AppState, ServiceSettings};
pub use worker::{RentalSweeper, SweeperConfig, spawn_sweeper};
