//! Persistence ports.
//!
//! Every method that mutates a rental is atomic in the adapter: rental creation locks the car
//! and re-checks the calendar before inserting, and [`RentalChange`] is a compare-and-set
//! against the persisted status and payment reference.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::car::{Car, CarQuery, CreateCarRequest, UpdateCarRequest};
use crate::model::notification::{NewNotification, Notification};
use crate::model::page::Page;
use crate::model::payment::{NewPayment, Payment};
use crate::model::rental::{DateRange, NewRental, PaymentStatus, Rental, RentalScope, RentalStatus};
use crate::model::user::User;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("car {0} not found")]
    CarNotFound(Uuid),
    #[error("car not available for selected dates")]
    Unavailable,
    #[error("rental cost overflows")]
    CostOverflow,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Conditional update of one rental, optionally recording a payment in the same transaction.
///
/// The update applies only while the stored status and payment reference still equal the
/// `expected_*` values.
#[derive(Debug, Clone, PartialEq)]
pub struct RentalChange {
    pub rental_id: Uuid,
    pub expected_status: RentalStatus,
    pub expected_payment_reference: Option<String>,
    pub status: RentalStatus,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub payment: Option<NewPayment>,
}

impl RentalChange {
    /// A change that leaves `rental` as it is; adjust fields from here.
    pub fn on(rental: &Rental) -> Self {
        Self {
            rental_id: rental.id,
            expected_status: rental.status,
            expected_payment_reference: rental.payment_reference.clone(),
            status: rental.status,
            payment_status: rental.payment_status,
            payment_reference: rental.payment_reference.clone(),
            rejection_reason: rental.rejection_reason.clone(),
            payment: None,
        }
    }

    pub fn status(mut self, status: RentalStatus) -> Self {
        self.status = status;
        self
    }

    pub fn payment_status(mut self, payment_status: PaymentStatus) -> Self {
        self.payment_status = payment_status;
        self
    }

    pub fn payment_reference(mut self, reference: impl Into<String>) -> Self {
        self.payment_reference = Some(reference.into());
        self
    }

    pub fn rejection_reason(mut self, reason: impl Into<String>) -> Self {
        self.rejection_reason = Some(reason.into());
        self
    }

    pub fn record_payment(mut self, payment: NewPayment) -> Self {
        self.payment = Some(payment);
        self
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RentalStore: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_car(&self, id: Uuid) -> Result<Option<Car>, StoreError>;

    async fn list_cars(&self, query: &CarQuery, page: Page) -> Result<(Vec<Car>, i64), StoreError>;

    async fn insert_car(&self, owner_id: Uuid, request: &CreateCarRequest) -> Result<Car, StoreError>;

    async fn update_car(&self, id: Uuid, request: &UpdateCarRequest) -> Result<Option<Car>, StoreError>;

    /// True when a blocking rental of `car_id` overlaps `range`.
    async fn has_blocking_rental(&self, car_id: Uuid, range: DateRange) -> Result<bool, StoreError>;

    /// Locks the car, re-checks availability, prices the range at the car's current rate and
    /// inserts a `pending` rental, all in one transaction.
    async fn insert_rental(&self, rental: &NewRental) -> Result<Rental, StoreError>;

    async fn find_rental(&self, id: Uuid) -> Result<Option<Rental>, StoreError>;

    async fn find_rental_by_payment_reference(&self, reference: &str) -> Result<Option<Rental>, StoreError>;

    async fn list_rentals(&self, scope: RentalScope, page: Page) -> Result<(Vec<Rental>, i64), StoreError>;

    /// Applies `change` if its expectations still hold. `Ok(None)` means a concurrent writer
    /// got there first.
    async fn apply_change(&self, change: &RentalChange) -> Result<Option<Rental>, StoreError>;

    async fn list_payments(&self, rental_id: Uuid) -> Result<Vec<Payment>, StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification, StoreError>;

    async fn list_notifications(&self, user_id: Uuid, page: Page) -> Result<(Vec<Notification>, i64), StoreError>;

    /// Flips `is_read`. `Ok(None)` when the notification does not belong to `user_id`.
    async fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> Result<Option<Notification>, StoreError>;
}
