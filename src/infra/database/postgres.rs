//! PostgreSQL database client implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgConnection, PgPool, Postgres, QueryBuilder, Row,
    postgres::{PgPoolOptions, PgRow},
};
use std::time::Duration;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{
    AppError, CreateRefundRequest, CreditOutcome, CreditReceipt, DatabaseClient, DatabaseError,
    Deposit, DepositStatus, LedgerEntry, ManualPayment, ManualPaymentStatus, NewDeposit,
    NewManualPayment, NewRental, NewUser, PaginatedResponse, ProviderActivation, RedemptionResult,
    ReferralBonus, ReferredUser, RefundOutcome, RefundRequest, RefundRequestStatus, Rental,
    RentalStatus, RewardsConfig, SystemStats, TransactionKind, User, ValidationError,
    WalletTransaction,
};

const USER_COLUMNS: &str = "id, email, display_name, balance_kobo, total_deposited_kobo, \
     total_spent_kobo, loyalty_points, referral_code, referred_by, referral_bonus_paid, \
     is_suspended, created_at, updated_at";

const TRANSACTION_COLUMNS: &str =
    "id, user_id, kind, amount_kobo, balance_after_kobo, reference, description, created_at";

const DEPOSIT_COLUMNS: &str = "id, user_id, provider, reference, amount_kobo, credited_kobo, \
     status, provider_reference, checkout_url, failure_reason, created_at, completed_at";

const MANUAL_PAYMENT_COLUMNS: &str = "id, user_id, amount_kobo, receipt_url, sender_name, note, \
     status, reviewed_by, review_note, created_at, reviewed_at";

const RENTAL_COLUMNS: &str = "id, user_id, service, country, price_kobo, status, activation_id, \
     phone_number, sms_code, sms_text, refunded, points_awarded, expires_at, created_at, updated_at";

const REFUND_REQUEST_COLUMNS: &str =
    "id, user_id, rental_id, reason, status, admin_note, created_at, resolved_at";

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL database client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn parse_column<T: std::str::FromStr<Err = String>>(
        row: &PgRow,
        column: &str,
    ) -> Result<T, AppError> {
        let raw: String = row.get(column);
        raw.parse()
            .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))
    }

    fn row_to_user(row: &PgRow) -> Result<User, AppError> {
        Ok(User {
            id: row.get("id"),
            email: row.get("email"),
            display_name: row.get("display_name"),
            balance_kobo: row.get("balance_kobo"),
            total_deposited_kobo: row.get("total_deposited_kobo"),
            total_spent_kobo: row.get("total_spent_kobo"),
            loyalty_points: row.get("loyalty_points"),
            referral_code: row.get("referral_code"),
            referred_by: row.get("referred_by"),
            referral_bonus_paid: row.get("referral_bonus_paid"),
            is_suspended: row.get("is_suspended"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_transaction(row: &PgRow) -> Result<WalletTransaction, AppError> {
        Ok(WalletTransaction {
            id: row.get("id"),
            user_id: row.get("user_id"),
            kind: Self::parse_column(row, "kind")?,
            amount_kobo: row.get("amount_kobo"),
            balance_after_kobo: row.get("balance_after_kobo"),
            reference: row.get("reference"),
            description: row.get("description"),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_deposit(row: &PgRow) -> Result<Deposit, AppError> {
        Ok(Deposit {
            id: row.get("id"),
            user_id: row.get("user_id"),
            provider: Self::parse_column(row, "provider")?,
            reference: row.get("reference"),
            amount_kobo: row.get("amount_kobo"),
            credited_kobo: row.get("credited_kobo"),
            status: Self::parse_column(row, "status")?,
            provider_reference: row.get("provider_reference"),
            checkout_url: row.get("checkout_url"),
            failure_reason: row.get("failure_reason"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
        })
    }

    fn row_to_manual_payment(row: &PgRow) -> Result<ManualPayment, AppError> {
        Ok(ManualPayment {
            id: row.get("id"),
            user_id: row.get("user_id"),
            amount_kobo: row.get("amount_kobo"),
            receipt_url: row.get("receipt_url"),
            sender_name: row.get("sender_name"),
            note: row.get("note"),
            status: Self::parse_column(row, "status")?,
            reviewed_by: row.get("reviewed_by"),
            review_note: row.get("review_note"),
            created_at: row.get("created_at"),
            reviewed_at: row.get("reviewed_at"),
        })
    }

    fn row_to_rental(row: &PgRow) -> Result<Rental, AppError> {
        Ok(Rental {
            id: row.get("id"),
            user_id: row.get("user_id"),
            service: row.get("service"),
            country: row.get("country"),
            price_kobo: row.get("price_kobo"),
            status: Self::parse_column(row, "status")?,
            activation_id: row.get("activation_id"),
            phone_number: row.get("phone_number"),
            sms_code: row.get("sms_code"),
            sms_text: row.get("sms_text"),
            refunded: row.get("refunded"),
            points_awarded: row.get("points_awarded"),
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_refund_request(row: &PgRow) -> Result<RefundRequest, AppError> {
        Ok(RefundRequest {
            id: row.get("id"),
            user_id: row.get("user_id"),
            rental_id: row.get("rental_id"),
            reason: row.get("reason"),
            status: Self::parse_column(row, "status")?,
            admin_note: row.get("admin_note"),
            created_at: row.get("created_at"),
            resolved_at: row.get("resolved_at"),
        })
    }

    /// Keyset pagination over `(created_at, id)`, newest first.
    ///
    /// `table` and `columns` are compile-time constants, never user input.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_page<T, F>(
        &self,
        table: &str,
        columns: &str,
        filters: Vec<(&str, String)>,
        limit: i64,
        cursor: Option<&str>,
        map_row: F,
        id_of: fn(&T) -> String,
    ) -> Result<PaginatedResponse<T>, AppError>
    where
        T: ToSchema,
        F: Fn(&PgRow) -> Result<T, AppError>,
    {
        // Clamp limit to valid range
        let limit = limit.clamp(1, 100);

        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {} WHERE TRUE",
            columns, table
        ));
        for (column, value) in filters {
            query.push(format!(" AND {} = ", column)).push_bind(value);
        }

        if let Some(cursor_id) = cursor {
            let cursor_row = sqlx::query(&format!("SELECT created_at FROM {} WHERE id = $1", table))
                .bind(cursor_id)
                .fetch_optional(&self.pool)
                .await?;
            let cursor_created_at: DateTime<Utc> = match cursor_row {
                Some(row) => row.get("created_at"),
                None => {
                    return Err(AppError::Validation(ValidationError::invalid(
                        "cursor",
                        "Invalid cursor",
                    )));
                }
            };
            query
                .push(" AND (created_at, id) < (")
                .push_bind(cursor_created_at)
                .push(", ")
                .push_bind(cursor_id.to_string())
                .push(")");
        }

        // Fetch one extra to determine if there are more items
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit + 1);

        let rows = query.build().fetch_all(&self.pool).await?;

        let has_more = rows.len() > limit as usize;
        let items: Vec<T> = rows
            .iter()
            .take(limit as usize)
            .map(map_row)
            .collect::<Result<Vec<_>, _>>()?;
        let next_cursor = if has_more {
            items.last().map(id_of)
        } else {
            None
        };

        Ok(PaginatedResponse::new(items, next_cursor, has_more))
    }

    async fn insert_ledger_row(
        conn: &mut PgConnection,
        user_id: &str,
        entry: &LedgerEntry,
        balance_after_kobo: i64,
    ) -> Result<WalletTransaction, AppError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO wallet_transactions (
                id, user_id, kind, amount_kobo, balance_after_kobo,
                reference, description, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount_kobo)
        .bind(balance_after_kobo)
        .bind(&entry.reference)
        .bind(&entry.description)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(WalletTransaction {
            id,
            user_id: user_id.to_string(),
            kind: entry.kind,
            amount_kobo: entry.amount_kobo,
            balance_after_kobo,
            reference: entry.reference.clone(),
            description: entry.description.clone(),
            created_at: now,
        })
    }

    /// Build the error for a debit that matched no row
    async fn debit_failure(conn: &mut PgConnection, user_id: &str, required: i64) -> AppError {
        match sqlx::query("SELECT balance_kobo FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await
        {
            Ok(Some(row)) => AppError::InsufficientFunds {
                required,
                available: row.get("balance_kobo"),
            },
            Ok(None) => AppError::Database(DatabaseError::NotFound(format!("User {}", user_id))),
            Err(e) => AppError::from(e),
        }
    }

    /// Credit a wallet inside an open transaction.
    ///
    /// Deposit credits also count toward the referral threshold and may pay
    /// the referrer's bonus in the same transaction.
    async fn credit_wallet(
        conn: &mut PgConnection,
        user_id: &str,
        entry: &LedgerEntry,
        rewards: Option<&RewardsConfig>,
    ) -> Result<CreditReceipt, AppError> {
        let counts_as_deposit = rewards.is_some();
        let row = sqlx::query(
            r#"
            UPDATE users
            SET balance_kobo = balance_kobo + $1,
                total_deposited_kobo = total_deposited_kobo + CASE WHEN $3 THEN $1 ELSE 0 END,
                updated_at = NOW()
            WHERE id = $2
            RETURNING balance_kobo, total_deposited_kobo, referred_by, referral_bonus_paid
            "#,
        )
        .bind(entry.amount_kobo)
        .bind(user_id)
        .bind(counts_as_deposit)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("User {}", user_id))))?;

        let balance_after: i64 = row.get("balance_kobo");
        let total_deposited: i64 = row.get("total_deposited_kobo");
        let referred_by: Option<String> = row.get("referred_by");
        let bonus_paid: bool = row.get("referral_bonus_paid");

        Self::insert_ledger_row(conn, user_id, entry, balance_after).await?;

        let mut referral_bonus = None;
        if let (Some(rewards), Some(referrer_id)) = (rewards, referred_by.as_deref())
            && rewards.referral_bonus_due(Some(referrer_id), bonus_paid, total_deposited)
        {
            referral_bonus =
                Self::pay_referral_bonus(conn, referrer_id, user_id, entry, rewards).await?;
        }

        Ok(CreditReceipt {
            user_id: user_id.to_string(),
            amount_kobo: entry.amount_kobo,
            balance_after_kobo: balance_after,
            referral_bonus,
        })
    }

    async fn pay_referral_bonus(
        conn: &mut PgConnection,
        referrer_id: &str,
        referee_id: &str,
        trigger: &LedgerEntry,
        rewards: &RewardsConfig,
    ) -> Result<Option<ReferralBonus>, AppError> {
        let flagged = sqlx::query(
            "UPDATE users SET referral_bonus_paid = TRUE WHERE id = $1 AND referral_bonus_paid = FALSE",
        )
        .bind(referee_id)
        .execute(&mut *conn)
        .await?;
        if flagged.rows_affected() == 0 {
            return Ok(None);
        }

        let amount = rewards.referral_bonus_kobo;
        let row = sqlx::query(
            r#"
            UPDATE users
            SET balance_kobo = balance_kobo + $1, updated_at = NOW()
            WHERE id = $2
            RETURNING balance_kobo
            "#,
        )
        .bind(amount)
        .bind(referrer_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            warn!(referrer_id = %referrer_id, "Referrer no longer exists, skipping bonus");
            return Ok(None);
        };

        let entry = LedgerEntry {
            kind: TransactionKind::ReferralBonus,
            amount_kobo: amount,
            reference: Some(referee_id.to_string()),
            description: "Referral bonus".to_string(),
        };
        Self::insert_ledger_row(conn, referrer_id, &entry, row.get("balance_kobo")).await?;

        sqlx::query(
            r#"
            INSERT INTO referral_rewards (id, referrer_id, referee_id, amount_kobo, trigger_reference, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(referrer_id)
        .bind(referee_id)
        .bind(amount)
        .bind(trigger.reference.as_deref().unwrap_or_default())
        .execute(&mut *conn)
        .await?;

        info!(referrer_id = %referrer_id, referee_id = %referee_id, amount = %amount, "Referral bonus paid");

        Ok(Some(ReferralBonus {
            referrer_id: referrer_id.to_string(),
            referee_id: referee_id.to_string(),
            amount_kobo: amount,
        }))
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, data), fields(email = %data.email))]
    async fn create_user(&self, data: &NewUser) -> Result<User, AppError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (
                id, email, display_name, referral_code, referred_by,
                api_token_hash, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&id)
        .bind(&data.email)
        .bind(&data.display_name)
        .bind(&data.referral_code)
        .bind(&data.referred_by)
        .bind(&data.api_token_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let mut user = User::new(
            id,
            data.email.clone(),
            data.display_name.clone(),
            data.referral_code.clone(),
        );
        user.referred_by = data.referred_by.clone();
        user.created_at = now;
        user.updated_at = now;
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    #[instrument(skip(self, token_hash))]
    async fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE api_token_hash = $1",
            USER_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    #[instrument(skip(self))]
    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE referral_code = $1",
            USER_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    #[instrument(skip(self))]
    async fn list_users(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<User>, AppError> {
        self.fetch_page(
            "users",
            USER_COLUMNS,
            vec![],
            limit,
            cursor,
            Self::row_to_user,
            |u| u.id.clone(),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn set_user_suspended(&self, id: &str, suspended: bool) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE users SET is_suspended = $1, updated_at = NOW() WHERE id = $2")
                .bind(suspended)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn list_referred_users(&self, referrer_id: &str) -> Result<Vec<ReferredUser>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, display_name, created_at, referral_bonus_paid
            FROM users
            WHERE referred_by = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(referrer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ReferredUser {
                user_id: row.get("id"),
                display_name: row.get("display_name"),
                joined_at: row.get("created_at"),
                bonus_paid: row.get("referral_bonus_paid"),
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn total_referral_bonus(&self, referrer_id: &str) -> Result<i64, AppError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount_kobo), 0)::BIGINT AS total FROM referral_rewards WHERE referrer_id = $1",
        )
        .bind(referrer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("total"))
    }

    #[instrument(skip(self, entry), fields(kind = %entry.kind, amount = %entry.amount_kobo))]
    async fn apply_ledger_entry(
        &self,
        user_id: &str,
        entry: &LedgerEntry,
    ) -> Result<WalletTransaction, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE users
            SET balance_kobo = balance_kobo + $1, updated_at = NOW()
            WHERE id = $2 AND balance_kobo + $1 >= 0
            RETURNING balance_kobo
            "#,
        )
        .bind(entry.amount_kobo)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let balance_after: i64 = match row {
            Some(row) => row.get("balance_kobo"),
            None => {
                let required = entry.amount_kobo.checked_neg().unwrap_or(i64::MAX);
                return Err(Self::debit_failure(&mut tx, user_id, required).await);
            }
        };

        let transaction = Self::insert_ledger_row(&mut tx, user_id, entry, balance_after).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    #[instrument(skip(self))]
    async fn list_wallet_transactions(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WalletTransaction>, AppError> {
        self.fetch_page(
            "wallet_transactions",
            TRANSACTION_COLUMNS,
            vec![("user_id", user_id.to_string())],
            limit,
            cursor,
            Self::row_to_transaction,
            |t| t.id.clone(),
        )
        .await
    }

    #[instrument(skip(self, data), fields(reference = %data.reference, provider = %data.provider))]
    async fn create_deposit(&self, data: &NewDeposit) -> Result<Deposit, AppError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO deposits (
                id, user_id, provider, reference, amount_kobo, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&id)
        .bind(&data.user_id)
        .bind(data.provider.as_str())
        .bind(&data.reference)
        .bind(data.amount_kobo)
        .bind(DepositStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Deposit {
            id,
            user_id: data.user_id.clone(),
            provider: data.provider,
            reference: data.reference.clone(),
            amount_kobo: data.amount_kobo,
            credited_kobo: None,
            status: DepositStatus::Pending,
            provider_reference: None,
            checkout_url: None,
            failure_reason: None,
            created_at: now,
            completed_at: None,
        })
    }

    #[instrument(skip(self))]
    async fn attach_checkout(
        &self,
        reference: &str,
        checkout_url: &str,
        provider_reference: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE deposits
            SET checkout_url = $1,
                provider_reference = COALESCE($2, provider_reference),
                updated_at = NOW()
            WHERE reference = $3
            "#,
        )
        .bind(checkout_url)
        .bind(provider_reference)
        .bind(reference)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_deposit_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Deposit>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM deposits WHERE reference = $1",
            DEPOSIT_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_deposit).transpose()
    }

    #[instrument(skip(self))]
    async fn list_deposits(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Deposit>, AppError> {
        self.fetch_page(
            "deposits",
            DEPOSIT_COLUMNS,
            vec![("user_id", user_id.to_string())],
            limit,
            cursor,
            Self::row_to_deposit,
            |d| d.id.clone(),
        )
        .await
    }

    #[instrument(skip(self, rewards))]
    async fn complete_deposit(
        &self,
        reference: &str,
        amount_kobo: i64,
        provider_reference: Option<&str>,
        rewards: &RewardsConfig,
    ) -> Result<CreditOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE deposits
            SET status = 'completed',
                credited_kobo = $2,
                provider_reference = COALESCE($3, provider_reference),
                failure_reason = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE reference = $1 AND status IN ('pending', 'failed')
            RETURNING user_id, provider
            "#,
        )
        .bind(reference)
        .bind(amount_kobo)
        .bind(provider_reference)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let exists = sqlx::query("SELECT 1 FROM deposits WHERE reference = $1")
                .bind(reference)
                .fetch_optional(&mut *tx)
                .await?;
            return match exists {
                Some(_) => Ok(CreditOutcome::AlreadyProcessed),
                None => Err(AppError::Database(DatabaseError::NotFound(format!(
                    "Deposit {}",
                    reference
                )))),
            };
        };

        let user_id: String = row.get("user_id");
        let provider: String = row.get("provider");
        let entry = LedgerEntry {
            kind: TransactionKind::Deposit,
            amount_kobo,
            reference: Some(reference.to_string()),
            description: format!("Wallet funding via {}", provider.replace('_', " ")),
        };
        let receipt = Self::credit_wallet(&mut tx, &user_id, &entry, Some(rewards)).await?;

        tx.commit().await?;
        Ok(CreditOutcome::Credited(receipt))
    }

    #[instrument(skip(self))]
    async fn fail_deposit(&self, reference: &str, reason: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE deposits
            SET status = 'failed', failure_reason = $2, updated_at = NOW()
            WHERE reference = $1 AND status = 'pending'
            "#,
        )
        .bind(reference)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, data), fields(user_id = %data.user_id, amount = %data.amount_kobo))]
    async fn create_manual_payment(
        &self,
        data: &NewManualPayment,
    ) -> Result<ManualPayment, AppError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO manual_payments (
                id, user_id, amount_kobo, receipt_url, sender_name, note, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&id)
        .bind(&data.user_id)
        .bind(data.amount_kobo)
        .bind(&data.receipt_url)
        .bind(&data.sender_name)
        .bind(&data.note)
        .bind(ManualPaymentStatus::Pending.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(ManualPayment {
            id,
            user_id: data.user_id.clone(),
            amount_kobo: data.amount_kobo,
            receipt_url: data.receipt_url.clone(),
            sender_name: data.sender_name.clone(),
            note: data.note.clone(),
            status: ManualPaymentStatus::Pending,
            reviewed_by: None,
            review_note: None,
            created_at: now,
            reviewed_at: None,
        })
    }

    #[instrument(skip(self))]
    async fn get_manual_payment(&self, id: &str) -> Result<Option<ManualPayment>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM manual_payments WHERE id = $1",
            MANUAL_PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_manual_payment).transpose()
    }

    #[instrument(skip(self))]
    async fn list_manual_payments(
        &self,
        user_id: Option<&str>,
        status: Option<ManualPaymentStatus>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<ManualPayment>, AppError> {
        let mut filters = Vec::new();
        if let Some(user_id) = user_id {
            filters.push(("user_id", user_id.to_string()));
        }
        if let Some(status) = status {
            filters.push(("status", status.as_str().to_string()));
        }
        self.fetch_page(
            "manual_payments",
            MANUAL_PAYMENT_COLUMNS,
            filters,
            limit,
            cursor,
            Self::row_to_manual_payment,
            |p| p.id.clone(),
        )
        .await
    }

    #[instrument(skip(self, rewards))]
    async fn approve_manual_payment(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
        rewards: &RewardsConfig,
    ) -> Result<CreditOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE manual_payments
            SET status = 'approved', reviewed_by = $2, review_note = $3, reviewed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING user_id, amount_kobo
            "#,
        )
        .bind(id)
        .bind(reviewer)
        .bind(note)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(CreditOutcome::AlreadyProcessed);
        };

        let user_id: String = row.get("user_id");
        let entry = LedgerEntry {
            kind: TransactionKind::ManualDeposit,
            amount_kobo: row.get("amount_kobo"),
            reference: Some(id.to_string()),
            description: "Manual payment approved".to_string(),
        };
        let receipt = Self::credit_wallet(&mut tx, &user_id, &entry, Some(rewards)).await?;

        tx.commit().await?;
        Ok(CreditOutcome::Credited(receipt))
    }

    #[instrument(skip(self))]
    async fn reject_manual_payment(
        &self,
        id: &str,
        reviewer: &str,
        note: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE manual_payments
            SET status = 'rejected', reviewed_by = $2, review_note = $3, reviewed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(reviewer)
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, data), fields(user_id = %data.user_id, service = %data.service, country = %data.country))]
    async fn reserve_rental(&self, data: &NewRental) -> Result<Rental, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE users
            SET balance_kobo = balance_kobo - $1, updated_at = NOW()
            WHERE id = $2 AND balance_kobo >= $1
            RETURNING balance_kobo
            "#,
        )
        .bind(data.price_kobo)
        .bind(&data.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let balance_after: i64 = match row {
            Some(row) => row.get("balance_kobo"),
            None => return Err(Self::debit_failure(&mut tx, &data.user_id, data.price_kobo).await),
        };

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO rentals (
                id, user_id, service, country, price_kobo, status, refunded, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $8)
            "#,
        )
        .bind(&id)
        .bind(&data.user_id)
        .bind(&data.service)
        .bind(&data.country)
        .bind(data.price_kobo)
        .bind(RentalStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let entry = LedgerEntry {
            kind: TransactionKind::RentalDebit,
            amount_kobo: -data.price_kobo,
            reference: Some(id.clone()),
            description: format!("Number rental: {} ({})", data.service, data.country),
        };
        Self::insert_ledger_row(&mut tx, &data.user_id, &entry, balance_after).await?;

        tx.commit().await?;

        Ok(Rental {
            id,
            user_id: data.user_id.clone(),
            service: data.service.clone(),
            country: data.country.clone(),
            price_kobo: data.price_kobo,
            status: RentalStatus::Pending,
            activation_id: None,
            phone_number: None,
            sms_code: None,
            sms_text: None,
            refunded: false,
            points_awarded: 0,
            expires_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    #[instrument(skip(self, activation), fields(activation_id = %activation.activation_id))]
    async fn activate_rental(
        &self,
        id: &str,
        activation: &ProviderActivation,
        expires_at: DateTime<Utc>,
    ) -> Result<Rental, AppError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE rentals
            SET status = 'active', activation_id = $2, phone_number = $3,
                expires_at = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            RENTAL_COLUMNS
        ))
        .bind(id)
        .bind(&activation.activation_id)
        .bind(&activation.phone_number)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_rental(&row),
            None => Err(AppError::InvalidState(format!(
                "Rental {} is not pending",
                id
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn get_rental(&self, id: &str) -> Result<Option<Rental>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM rentals WHERE id = $1", RENTAL_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_rental).transpose()
    }

    #[instrument(skip(self))]
    async fn list_rentals(
        &self,
        user_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Rental>, AppError> {
        self.fetch_page(
            "rentals",
            RENTAL_COLUMNS,
            vec![("user_id", user_id.to_string())],
            limit,
            cursor,
            Self::row_to_rental,
            |r| r.id.clone(),
        )
        .await
    }

    #[instrument(skip(self, code, text))]
    async fn complete_rental(
        &self,
        id: &str,
        code: &str,
        text: Option<&str>,
        loyalty_points: i64,
    ) -> Result<Option<Rental>, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE rentals
            SET status = 'completed', sms_code = $2, sms_text = $3,
                points_awarded = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND refunded = FALSE
            RETURNING {}
            "#,
            RENTAL_COLUMNS
        ))
        .bind(id)
        .bind(code)
        .bind(text)
        .bind(loyalty_points.max(0))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let rental = Self::row_to_rental(&row)?;

        sqlx::query(
            r#"
            UPDATE users
            SET total_spent_kobo = total_spent_kobo + $1,
                loyalty_points = loyalty_points + $2,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(rental.price_kobo)
        .bind(rental.points_awarded)
        .bind(&rental.user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(rental))
    }

    #[instrument(skip(self))]
    async fn refund_rental(
        &self,
        id: &str,
        final_status: Option<RentalStatus>,
        description: &str,
    ) -> Result<RefundOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE rentals
            SET refunded = TRUE, status = COALESCE($2, status), updated_at = NOW()
            WHERE id = $1 AND refunded = FALSE AND ($3 OR sms_code IS NULL)
            RETURNING user_id, price_kobo, points_awarded, sms_code IS NOT NULL AS delivered
            "#,
        )
        .bind(id)
        .bind(final_status.map(|s| s.as_str()))
        .bind(final_status.is_none())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let existing = sqlx::query("SELECT refunded FROM rentals WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            return match existing {
                None => Err(AppError::Database(DatabaseError::NotFound(format!(
                    "Rental {}",
                    id
                )))),
                Some(row) if row.get::<bool, _>("refunded") => Ok(RefundOutcome::AlreadyRefunded),
                Some(_) => Err(AppError::InvalidState(
                    "SMS code already received for this rental".to_string(),
                )),
            };
        };

        let user_id: String = row.get("user_id");
        let price_kobo: i64 = row.get("price_kobo");

        // A delivered rental counted toward spend and earned points; take both back
        if row.get::<bool, _>("delivered") {
            sqlx::query(
                r#"
                UPDATE users
                SET total_spent_kobo = GREATEST(total_spent_kobo - $1, 0),
                    loyalty_points = GREATEST(loyalty_points - $2, 0),
                    updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(price_kobo)
            .bind(row.get::<i64, _>("points_awarded"))
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;
        }

        let entry = LedgerEntry {
            kind: TransactionKind::RentalRefund,
            amount_kobo: price_kobo,
            reference: Some(id.to_string()),
            description: description.to_string(),
        };
        let receipt = Self::credit_wallet(&mut tx, &user_id, &entry, None).await?;

        tx.commit().await?;
        Ok(RefundOutcome::Refunded {
            amount_kobo: receipt.amount_kobo,
            balance_after_kobo: receipt.balance_after_kobo,
        })
    }

    #[instrument(skip(self))]
    async fn get_overdue_rentals(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rental>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM rentals
            WHERE (status = 'active' AND sms_code IS NULL AND expires_at <= $1)
               OR (status = 'pending' AND refunded = FALSE AND created_at <= $2)
            ORDER BY COALESCE(expires_at, created_at) ASC
            LIMIT $3
            "#,
            RENTAL_COLUMNS
        ))
        .bind(now)
        .bind(pending_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_rental).collect()
    }

    #[instrument(skip(self, data), fields(rental_id = %data.rental_id))]
    async fn create_refund_request(
        &self,
        user_id: &str,
        data: &CreateRefundRequest,
    ) -> Result<RefundRequest, AppError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO refund_requests (id, user_id, rental_id, reason, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(&data.rental_id)
        .bind(&data.reason)
        .bind(RefundRequestStatus::Pending.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(RefundRequest {
            id,
            user_id: user_id.to_string(),
            rental_id: data.rental_id.clone(),
            reason: data.reason.clone(),
            status: RefundRequestStatus::Pending,
            admin_note: None,
            created_at: now,
            resolved_at: None,
        })
    }

    #[instrument(skip(self))]
    async fn get_refund_request(&self, id: &str) -> Result<Option<RefundRequest>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM refund_requests WHERE id = $1",
            REFUND_REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_refund_request).transpose()
    }

    #[instrument(skip(self))]
    async fn list_refund_requests(
        &self,
        user_id: Option<&str>,
        status: Option<RefundRequestStatus>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<RefundRequest>, AppError> {
        let mut filters = Vec::new();
        if let Some(user_id) = user_id {
            filters.push(("user_id", user_id.to_string()));
        }
        if let Some(status) = status {
            filters.push(("status", status.as_str().to_string()));
        }
        self.fetch_page(
            "refund_requests",
            REFUND_REQUEST_COLUMNS,
            filters,
            limit,
            cursor,
            Self::row_to_refund_request,
            |r| r.id.clone(),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn resolve_refund_request(
        &self,
        id: &str,
        status: RefundRequestStatus,
        note: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refund_requests
            SET status = $2, admin_note = $3, resolved_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn redeem_loyalty_points(
        &self,
        user_id: &str,
        points: i64,
        credit_kobo: i64,
    ) -> Result<RedemptionResult, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE users
            SET loyalty_points = loyalty_points - $1,
                balance_kobo = balance_kobo + $2,
                updated_at = NOW()
            WHERE id = $3 AND loyalty_points >= $1
            RETURNING loyalty_points, balance_kobo
            "#,
        )
        .bind(points)
        .bind(credit_kobo)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let existing = sqlx::query("SELECT loyalty_points FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match existing {
                Some(row) => AppError::Validation(ValidationError::invalid(
                    "points",
                    format!(
                        "Only {} points available",
                        row.get::<i64, _>("loyalty_points")
                    ),
                )),
                None => AppError::Database(DatabaseError::NotFound(format!("User {}", user_id))),
            });
        };

        let remaining: i64 = row.get("loyalty_points");
        let balance_after: i64 = row.get("balance_kobo");
        let entry = LedgerEntry {
            kind: TransactionKind::LoyaltyRedemption,
            amount_kobo: credit_kobo,
            reference: None,
            description: format!("Redeemed {} loyalty points", points),
        };
        Self::insert_ledger_row(&mut tx, user_id, &entry, balance_after).await?;

        tx.commit().await?;
        Ok(RedemptionResult {
            points_redeemed: points,
            credited_kobo: credit_kobo,
            remaining_points: remaining,
            balance_after_kobo: balance_after,
        })
    }

    #[instrument(skip(self))]
    async fn system_stats(&self) -> Result<SystemStats, AppError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users) AS total_users,
                (SELECT COALESCE(SUM(balance_kobo), 0)::BIGINT FROM users) AS total_balance,
                (SELECT COALESCE(SUM(credited_kobo), 0)::BIGINT FROM deposits WHERE status = 'completed')
                  + (SELECT COALESCE(SUM(amount_kobo), 0)::BIGINT FROM manual_payments WHERE status = 'approved')
                  AS total_deposits,
                (SELECT COUNT(*) FROM manual_payments WHERE status = 'pending') AS pending_manual,
                (SELECT COUNT(*) FROM rentals WHERE status = 'active') AS active_rentals,
                (SELECT COUNT(*) FROM refund_requests WHERE status = 'pending') AS pending_refunds
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SystemStats {
            total_users: row.get("total_users"),
            total_wallet_balance_kobo: row.get("total_balance"),
            total_deposits_kobo: row.get("total_deposits"),
            pending_manual_payments: row.get("pending_manual"),
            active_rentals: row.get("active_rentals"),
            pending_refund_requests: row.get("pending_refunds"),
        })
    }
}
