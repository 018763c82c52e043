//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod notification;
pub mod payment;
pub mod rental;
pub mod rewards;
pub mod traits;
pub mod types;

pub use error::{AppError, ConfigError, DatabaseError, ExternalServiceError, ValidationError};
pub use notification::{EmailMessage, format_naira};
pub use payment::{
    CheckoutRequest, CheckoutSession, CreditOutcome, CreditReceipt, Deposit, DepositStatus,
    GatewayEvent, GatewayOutcome, InitiateDepositRequest, InitiateDepositResponse, ManualPayment,
    ManualPaymentQuery, ManualPaymentStatus, NewDeposit, NewManualPayment, PaymentProvider,
    PaymentUpdate, PaymentUpdateResponse, ReviewRequest, SubmitManualPaymentRequest,
    generate_deposit_reference,
};
pub use rental::{
    CreateRefundRequest, NewRental, PriceQuery, PriceQuote, PricingConfig, ProviderActivation,
    ProviderOffer, RefundOutcome, RefundRequest, RefundRequestQuery, RefundRequestStatus, Rental,
    RentNumberRequest, RentalStatus, SmsStatus,
};
pub use rewards::{
    RedeemPointsRequest, RedemptionResult, ReferralBonus, ReferralSummary, ReferredUser,
    RewardsConfig,
};
pub use traits::{DatabaseClient, Notifier, PaymentGateway, SmsProvider};
pub use types::{
    AdjustBalanceRequest, ComponentHealth, ErrorDetail, ErrorResponse, HealthResponse,
    HealthStatus, LedgerEntry, MAX_ADJUSTMENT_KOBO, MIN_ADJUSTMENT_KOBO, NewUser,
    PaginatedResponse, PaginationParams, RateLimitResponse, RegisterUserRequest,
    RegisterUserResponse, SuspendUserRequest, SystemStats, TransactionKind, User,
    WalletTransaction,
};
