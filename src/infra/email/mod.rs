//! Outbound email.

pub mod resend;

pub use resend::{DEFAULT_EMAIL_API_URL, DEFAULT_EMAIL_FROM, ResendNotifier};
