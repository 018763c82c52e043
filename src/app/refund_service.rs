//! Rental refunds and user refund requests.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::domain::{
    AppError, CreateRefundRequest, DatabaseClient, DatabaseError, PaginatedResponse,
    RefundOutcome, RefundRequest, RefundRequestStatus, Rental, RentalStatus, User,
};

/// Refund service. Every refund of a rental goes through [`RefundService::refund_rental`].
pub struct RefundService {
    db_client: Arc<dyn DatabaseClient>,
}

impl RefundService {
    #[must_use]
    pub fn new(db_client: Arc<dyn DatabaseClient>) -> Self {
        Self { db_client }
    }

    /// Return a rental's price to its owner exactly once
    #[instrument(skip(self))]
    pub async fn refund_rental(
        &self,
        rental_id: &str,
        final_status: Option<RentalStatus>,
        reason: &str,
    ) -> Result<RefundOutcome, AppError> {
        let outcome = self
            .db_client
            .refund_rental(rental_id, final_status, reason)
            .await?;
        match &outcome {
            RefundOutcome::Refunded {
                amount_kobo,
                balance_after_kobo,
            } => info!(
                rental_id = %rental_id,
                amount = %amount_kobo,
                balance_after = %balance_after_kobo,
                "Rental refunded"
            ),
            RefundOutcome::AlreadyRefunded => {
                info!(rental_id = %rental_id, "Rental was already refunded")
            }
        }
        Ok(outcome)
    }

    async fn load_rental(&self, id: &str) -> Result<Rental, AppError> {
        self.db_client
            .get_rental(id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("Rental {}", id))))
    }

    async fn load_request(&self, id: &str) -> Result<RefundRequest, AppError> {
        self.db_client
            .get_refund_request(id)
            .await?
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(format!("Refund request {}", id)))
            })
    }

    /// File a complaint about a completed rental whose code did not work
    #[instrument(skip(self, user, request), fields(user_id = %user.id, rental_id = %request.rental_id))]
    pub async fn request_refund(
        &self,
        user: &User,
        request: &CreateRefundRequest,
    ) -> Result<RefundRequest, AppError> {
        request.validate()?;

        let rental = self.load_rental(&request.rental_id).await?;
        if rental.user_id != user.id {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "Rental {}",
                request.rental_id
            ))));
        }
        if rental.refunded {
            return Err(AppError::InvalidState(
                "Rental has already been refunded".to_string(),
            ));
        }
        if rental.status != RentalStatus::Completed {
            return Err(AppError::InvalidState(format!(
                "Only completed rentals can be disputed (rental is {})",
                rental.status
            )));
        }

        let refund_request = self
            .db_client
            .create_refund_request(&user.id, request)
            .await
            .map_err(|e| match e {
                AppError::Database(DatabaseError::Duplicate(_)) => {
                    AppError::Database(DatabaseError::Duplicate(
                        "A refund request for this rental is already open".to_string(),
                    ))
                }
                other => other,
            })?;

        info!(request_id = %refund_request.id, "Refund request filed");
        Ok(refund_request)
    }

    #[instrument(skip(self))]
    pub async fn list_refund_requests(
        &self,
        user_id: Option<&str>,
        status: Option<RefundRequestStatus>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<RefundRequest>, AppError> {
        self.db_client
            .list_refund_requests(user_id, status, limit, cursor)
            .await
    }

    /// Refund the disputed rental and close the request
    #[instrument(skip(self, note))]
    pub async fn approve_refund_request(
        &self,
        id: &str,
        note: Option<&str>,
    ) -> Result<RefundRequest, AppError> {
        let request = self.load_request(id).await?;
        if request.status != RefundRequestStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "Refund request is already {}",
                request.status
            )));
        }

        // Idempotent, so a concurrent approval cannot pay twice
        self.refund_rental(
            &request.rental_id,
            None,
            &format!("Refund approved: {}", request.reason),
        )
        .await?;

        if !self
            .db_client
            .resolve_refund_request(id, RefundRequestStatus::Approved, note)
            .await?
        {
            warn!(request_id = %id, "Refund request resolved concurrently");
        }

        self.load_request(id).await
    }

    #[instrument(skip(self, note))]
    pub async fn reject_refund_request(
        &self,
        id: &str,
        note: Option<&str>,
    ) -> Result<RefundRequest, AppError> {
        let request = self.load_request(id).await?;
        if !self
            .db_client
            .resolve_refund_request(id, RefundRequestStatus::Rejected, note)
            .await?
        {
            return Err(AppError::InvalidState(format!(
                "Refund request is already {}",
                request.status
            )));
        }
        info!(request_id = %id, "Refund request rejected");
        self.load_request(id).await
    }

    /// Admin refund of any rental that has not been refunded yet.
    ///
    /// Rentals still in flight are closed as cancelled; finished ones keep
    /// their status.
    #[instrument(skip(self))]
    pub async fn admin_refund_rental(
        &self,
        rental_id: &str,
        reason: Option<&str>,
    ) -> Result<RefundOutcome, AppError> {
        let rental = self.load_rental(rental_id).await?;
        let final_status = if rental.status.is_terminal() {
            None
        } else {
            Some(RentalStatus::Cancelled)
        };
        let description = match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reason) => format!("Admin refund: {}", reason),
            None => "Admin refund".to_string(),
        };
        self.refund_rental(rental_id, final_status, &description)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewRental, NewUser, ProviderActivation};
    use crate::test_utils::MockDatabaseClient;
    use chrono::{Duration, Utc};

    async fn setup() -> (Arc<MockDatabaseClient>, RefundService, User) {
        let db = Arc::new(MockDatabaseClient::new());
        let user = db
            .create_user(&NewUser {
                email: "tobi@example.com".to_string(),
                display_name: "Tobi".to_string(),
                referral_code: "TOBI0001".to_string(),
                referred_by: None,
                api_token_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        db.set_balance(&user.id, 100_000);
        let service = RefundService::new(db.clone());
        (db, service, user)
    }

    async fn active_rental(db: &MockDatabaseClient, user: &User) -> Rental {
        let rental = db
            .reserve_rental(&NewRental {
                user_id: user.id.clone(),
                service: "telegram".to_string(),
                country: "nigeria".to_string(),
                price_kobo: 40_000,
            })
            .await
            .unwrap();
        db.activate_rental(
            &rental.id,
            &ProviderActivation {
                activation_id: "act-9".to_string(),
                phone_number: "+2348000000009".to_string(),
            },
            Utc::now() + Duration::minutes(20),
        )
        .await
        .unwrap()
    }

    async fn completed_rental(db: &MockDatabaseClient, user: &User) -> Rental {
        let rental = active_rental(db, user).await;
        db.complete_rental(&rental.id, "123456", None, 4)
            .await
            .unwrap()
            .unwrap()
    }

    fn dispute(rental: &Rental) -> CreateRefundRequest {
        CreateRefundRequest {
            rental_id: rental.id.clone(),
            reason: "Code was rejected by Telegram".to_string(),
        }
    }

    #[tokio::test]
    async fn test_refund_rental_is_idempotent() {
        let (db, service, user) = setup().await;
        let rental = active_rental(&db, &user).await;

        let first = service
            .refund_rental(&rental.id, Some(RentalStatus::Cancelled), "Refund: test")
            .await
            .unwrap();
        assert_eq!(
            first,
            RefundOutcome::Refunded {
                amount_kobo: 40_000,
                balance_after_kobo: 100_000
            }
        );

        let second = service
            .refund_rental(&rental.id, Some(RentalStatus::Cancelled), "Refund: test")
            .await
            .unwrap();
        assert_eq!(second, RefundOutcome::AlreadyRefunded);
        assert_eq!(db.get_user_now(&user.id).unwrap().balance_kobo, 100_000);
    }

    #[tokio::test]
    async fn test_request_refund_requires_completed_rental() {
        let (db, service, user) = setup().await;
        let rental = active_rental(&db, &user).await;

        let result = service.request_refund(&user, &dispute(&rental)).await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_request_refund_rejects_duplicates() {
        let (db, service, user) = setup().await;
        let rental = completed_rental(&db, &user).await;

        let request = service.request_refund(&user, &dispute(&rental)).await.unwrap();
        assert_eq!(request.status, RefundRequestStatus::Pending);

        let duplicate = service.request_refund(&user, &dispute(&rental)).await;
        assert!(matches!(
            duplicate,
            Err(AppError::Database(DatabaseError::Duplicate(msg))) if msg.contains("already open")
        ));
    }

    #[tokio::test]
    async fn test_approve_refund_request_pays_once() {
        let (db, service, user) = setup().await;
        let rental = completed_rental(&db, &user).await;
        assert_eq!(rental.points_awarded, 4);
        let earned = db.get_user_now(&user.id).unwrap();
        assert_eq!(earned.loyalty_points, 4);
        assert_eq!(earned.total_spent_kobo, 40_000);
        let request = service.request_refund(&user, &dispute(&rental)).await.unwrap();

        let approved = service
            .approve_refund_request(&request.id, Some("Confirmed with provider"))
            .await
            .unwrap();
        assert_eq!(approved.status, RefundRequestStatus::Approved);
        assert_eq!(approved.admin_note.as_deref(), Some("Confirmed with provider"));

        let refunded = db.get_rental(&rental.id).await.unwrap().unwrap();
        assert!(refunded.refunded);
        assert_eq!(refunded.status, RentalStatus::Completed);
        let reversed = db.get_user_now(&user.id).unwrap();
        assert_eq!(reversed.balance_kobo, 100_000);
        assert_eq!(reversed.loyalty_points, 0);
        assert_eq!(reversed.total_spent_kobo, 0);

        let again = service.approve_refund_request(&request.id, None).await;
        assert!(matches!(again, Err(AppError::InvalidState(_))));
        assert_eq!(db.get_user_now(&user.id).unwrap().balance_kobo, 100_000);
    }

    #[tokio::test]
    async fn test_reject_refund_request() {
        let (db, service, user) = setup().await;
        let rental = completed_rental(&db, &user).await;
        let request = service.request_refund(&user, &dispute(&rental)).await.unwrap();

        let rejected = service
            .reject_refund_request(&request.id, Some("Code was used"))
            .await
            .unwrap();
        assert_eq!(rejected.status, RefundRequestStatus::Rejected);
        assert!(!db.get_rental(&rental.id).await.unwrap().unwrap().refunded);

        let again = service.reject_refund_request(&request.id, None).await;
        assert!(matches!(again, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_admin_refund_closes_in_flight_rental() {
        let (db, service, user) = setup().await;
        db.set_loyalty_points(&user.id, 10);
        let rental = active_rental(&db, &user).await;

        let outcome = service
            .admin_refund_rental(&rental.id, Some("  Stuck number "))
            .await
            .unwrap();
        assert!(matches!(outcome, RefundOutcome::Refunded { .. }));

        let closed = db.get_rental(&rental.id).await.unwrap().unwrap();
        assert_eq!(closed.status, RentalStatus::Cancelled);
        // Nothing was delivered, so earned points stay put
        assert_eq!(db.get_user_now(&user.id).unwrap().loyalty_points, 10);
        let ledger = db.transactions_for(&user.id);
        assert_eq!(
            ledger.last().map(|t| t.description.as_str()),
            Some("Admin refund: Stuck number")
        );
    }

    #[tokio::test]
    async fn test_admin_refund_keeps_completed_status() {
        let (db, service, user) = setup().await;
        let rental = completed_rental(&db, &user).await;
        // Some of the earned points were already redeemed
        db.set_loyalty_points(&user.id, 1);

        service.admin_refund_rental(&rental.id, None).await.unwrap();
        let refunded = db.get_rental(&rental.id).await.unwrap().unwrap();
        assert_eq!(refunded.status, RentalStatus::Completed);
        assert!(refunded.refunded);
        let user_now = db.get_user_now(&user.id).unwrap();
        assert_eq!(user_now.loyalty_points, 0);
        assert_eq!(user_now.total_spent_kobo, 0);

        let again = service.admin_refund_rental(&rental.id, None).await.unwrap();
        assert_eq!(again, RefundOutcome::AlreadyRefunded);
    }
}
