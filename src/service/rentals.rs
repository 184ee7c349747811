//! Rental creation and owner/renter driven status changes.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::availability::is_car_available;
use super::clock::Clock;
use super::lifecycle::{authorize_transition, can_view_rental, plan_transition};
use super::notify::{self, Notifier};
use super::MAX_CHANGE_ATTEMPTS;
use crate::auth::Actor;
use crate::error::{AppError, AppResult};
use crate::model::car::AvailabilityResponse;
use crate::model::page::{Page, Paged};
use crate::model::payment::Payment;
use crate::model::rental::{
    CreateRentalRequest, DateRange, NewRental, Rental, RentalScope, RentalStatus, StatusChangeRequest,
};
use crate::store::{RentalChange, RentalStore};

const DEFAULT_PAYMENT_METHOD: &str = "card";

/// Accepts `YYYY-MM-DD`, or an RFC 3339 timestamp whose UTC date is taken.
pub fn parse_date(raw: Option<&str>, field: &str) -> AppResult<NaiveDate> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{field} is required")))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|at| at.naive_utc().date()))
        .map_err(|_| AppError::Validation(format!("{field} must be a date in YYYY-MM-DD format")))
}

/// Parses both ends and checks `end > start`.
pub fn parse_range(start: Option<&str>, end: Option<&str>) -> AppResult<DateRange> {
    let start = parse_date(start, "startDate")?;
    let end = parse_date(end, "endDate")?;
    DateRange::new(start, end).ok_or_else(|| AppError::Validation("endDate must be after startDate".into()))
}

fn required_text(value: Option<String>, field: &str) -> AppResult<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{field} is required")))
}

/// Reads a status in its wire form (`confirmed`, `payment_failed`, ...).
fn requested_status(raw: &str) -> Option<RentalStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned())).ok()
}

pub struct RentalService {
    store: Arc<dyn RentalStore>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl RentalService {
    pub fn new(store: Arc<dyn RentalStore>, notifier: Notifier, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    /// Books a car for the authenticated renter and tells the owner.
    pub async fn create(&self, actor: &Actor, request: CreateRentalRequest) -> AppResult<Rental> {
        let car_id = request
            .car_id
            .ok_or_else(|| AppError::Validation("carId is required".into()))?;
        let range = parse_range(request.start_date.as_deref(), request.end_date.as_deref())?;
        if range.start() < self.clock.today() {
            return Err(AppError::Validation("startDate cannot be in the past".into()));
        }
        let pickup_location = required_text(request.pickup_location, "pickupLocation")?;
        let dropoff_location = required_text(request.dropoff_location, "dropoffLocation")?;
        let payment_method = request
            .payment_method
            .map(|m| m.trim().to_owned())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_owned());

        self.store
            .find_user(actor.id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        let car = self
            .store
            .find_car(car_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Car not found".into()))?;
        if !car.is_available {
            return Err(AppError::Conflict("car is not available for rent".into()));
        }

        // Authoritative re-check and pricing happen inside the store's transaction.
        let rental = self
            .store
            .insert_rental(&NewRental {
                car_id,
                user_id: actor.id,
                range,
                payment_method,
                pickup_location,
                dropoff_location,
            })
            .await?;

        info!(
            rental_id = %rental.id,
            %car_id,
            renter_id = %actor.id,
            total_cost = rental.total_cost,
            "rental requested"
        );
        self.notifier.notify(notify::rental_requested(&rental)).await;
        Ok(rental)
    }

    async fn load(&self, id: Uuid) -> AppResult<Rental> {
        self.store
            .find_rental(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Rental not found".into()))
    }

    /// Renter, car owner or admin. Everyone else gets the same 404 as for a missing rental.
    pub async fn get(&self, actor: &Actor, id: Uuid) -> AppResult<Rental> {
        let rental = self.load(id).await?;
        if !can_view_rental(actor, &rental) {
            return Err(AppError::NotFound("Rental not found".into()));
        }
        Ok(rental)
    }

    pub async fn list_for_renter(&self, actor: &Actor, user_id: Uuid, page: Page) -> AppResult<Paged<Rental>> {
        self.list(actor, RentalScope::Renter(user_id), user_id, page).await
    }

    pub async fn list_for_owner(&self, actor: &Actor, owner_id: Uuid, page: Page) -> AppResult<Paged<Rental>> {
        self.list(actor, RentalScope::Owner(owner_id), owner_id, page).await
    }

    async fn list(&self, actor: &Actor, scope: RentalScope, subject: Uuid, page: Page) -> AppResult<Paged<Rental>> {
        if actor.id != subject && !actor.is_admin() {
            return Err(AppError::Forbidden("you can only list your own rentals".into()));
        }
        let (items, total) = self.store.list_rentals(scope, page).await?;
        Ok(Paged::new(items, total, page))
    }

    /// Owner-facing status endpoint.
    pub async fn update_status(&self, actor: &Actor, id: Uuid, request: StatusChangeRequest) -> AppResult<Rental> {
        let raw = request
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Validation("status is required".into()))?;
        let to = match requested_status(raw) {
            Some(status @ (RentalStatus::Confirmed
            | RentalStatus::Rejected
            | RentalStatus::Cancelled
            | RentalStatus::Completed)) => status,
            _ => {
                return Err(AppError::Validation(
                    "status must be one of confirmed, rejected, cancelled, completed".into(),
                ))
            }
        };
        let reason = match to {
            RentalStatus::Rejected => Some(required_text(request.rejection_reason, "rejectionReason")?),
            _ => None,
        };
        self.transition(actor, id, to, reason).await
    }

    /// Cancellation through `DELETE`: the row stays, only refused once the rental started.
    pub async fn cancel(&self, actor: &Actor, id: Uuid) -> AppResult<Rental> {
        let rental = self.get(actor, id).await?;
        if rental.has_started(self.clock.today()) {
            return Err(AppError::Validation(
                "rental has already started and can no longer be cancelled".into(),
            ));
        }
        self.transition(actor, id, RentalStatus::Cancelled, None).await
    }

    /// Decides against the persisted rental and applies with compare-and-set; a lost race
    /// re-reads and decides again.
    async fn transition(
        &self,
        actor: &Actor,
        id: Uuid,
        to: RentalStatus,
        reason: Option<String>,
    ) -> AppResult<Rental> {
        for attempt in 1..=MAX_CHANGE_ATTEMPTS {
            let rental = self.load(id).await?;
            authorize_transition(actor, &rental, to, self.clock.today())?;
            let transition = plan_transition(rental.status, to)?;

            let mut change = RentalChange::on(&rental)
                .status(to)
                .payment_status(transition.payment_status_after(rental.payment_status));
            if let Some(reason) = &reason {
                change = change.rejection_reason(reason.clone());
            }

            match self.store.apply_change(&change).await? {
                Some(updated) => {
                    info!(
                        rental_id = %id,
                        from = %transition.from,
                        to = %transition.to,
                        actor_id = %actor.id,
                        "rental status changed"
                    );
                    self.notifier.notify(notify::rental_status_changed(&updated)).await;
                    return Ok(updated);
                }
                None => debug!(rental_id = %id, attempt, "rental changed underneath, re-deciding"),
            }
        }
        warn!(rental_id = %id, "status change kept losing races");
        Err(AppError::Conflict("rental was modified concurrently, please retry".into()))
    }

    /// Client-side pre-check. Booking repeats it authoritatively.
    pub async fn check_availability(
        &self,
        car_id: Uuid,
        start: Option<&str>,
        end: Option<&str>,
    ) -> AppResult<AvailabilityResponse> {
        let range = parse_range(start, end)?;
        self.store
            .find_car(car_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Car not found".into()))?;
        let available = is_car_available(self.store.as_ref(), car_id, range).await?;
        Ok(AvailabilityResponse {
            car_id,
            start_date: range.start(),
            end_date: range.end(),
            available,
        })
    }

    pub async fn payments_for(&self, actor: &Actor, rental_id: Uuid) -> AppResult<Vec<Payment>> {
        let rental = self.get(actor, rental_id).await?;
        Ok(self.store.list_payments(rental.id).await?)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::model::car::{Car, UpdateCarRequest};
    use crate::model::notification::Notification;
    use crate::model::rental::PaymentStatus;
    use crate::model::user::{Role, User};
    use crate::service::clock::FixedClock;
    use crate::service::notify::PushHub;
    use crate::store::memory::MemoryStore;
    use crate::store::{MockNotificationStore, NotificationStore, StoreError};

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).expect("valid date")
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        service: RentalService,
        owner: User,
        renter: User,
        car: Car,
    }

    impl Fixture {
        fn owner(&self) -> Actor {
            Actor { id: self.owner.id, role: Role::User }
        }

        fn renter(&self) -> Actor {
            Actor { id: self.renter.id, role: Role::User }
        }

        async fn book(&self, start: &str, end: &str) -> AppResult<Rental> {
            self.service.create(&self.renter(), request(self.car.id, start, end)).await
        }
    }

    async fn fixture_with(notifications: Option<Arc<dyn NotificationStore>>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let owner = store.add_user("Olivia Owner", Role::User).await;
        let renter = store.add_user("Ray Renter", Role::User).await;
        let car = store.add_car(owner.id, 50).await;
        let notifications: Arc<dyn NotificationStore> = match notifications {
            Some(notifications) => notifications,
            None => store.clone(),
        };
        let service = RentalService::new(
            store.clone(),
            Notifier::new(notifications, PushHub::new()),
            Arc::new(FixedClock::on(date(5, 20))),
        );
        Fixture {
            store,
            service,
            owner,
            renter,
            car,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(None).await
    }

    fn request(car_id: Uuid, start: &str, end: &str) -> CreateRentalRequest {
        CreateRentalRequest {
            car_id: Some(car_id),
            start_date: Some(start.to_owned()),
            end_date: Some(end.to_owned()),
            pickup_location: Some("Airport".to_owned()),
            dropoff_location: Some("Downtown".to_owned()),
            payment_method: Some("card".to_owned()),
        }
    }

    fn status(to: &str) -> StatusChangeRequest {
        StatusChangeRequest {
            status: Some(to.to_owned()),
            rejection_reason: None,
        }
    }

    #[tokio::test]
    async fn booking_scenario_end_to_end() {
        let fx = fixture().await;

        let first = fx.book("2024-06-01", "2024-06-03").await.expect("booked");
        assert_eq!(first.total_days, 2);
        assert_eq!(first.daily_rate, 50);
        assert_eq!(first.total_cost, 100);
        assert_eq!(first.status, RentalStatus::Pending);
        assert_eq!(first.payment_status, PaymentStatus::Pending);

        let second = fx.book("2024-06-02", "2024-06-04").await;
        assert!(matches!(second, Err(AppError::Conflict(_))));

        let confirmed = fx
            .service
            .update_status(&fx.owner(), first.id, status("confirmed"))
            .await
            .expect("owner confirms");
        assert_eq!(confirmed.status, RentalStatus::Confirmed);
        assert_eq!(confirmed.payment_status, PaymentStatus::Paid);

        let reject = StatusChangeRequest {
            status: Some("rejected".to_owned()),
            rejection_reason: Some("changed my mind".to_owned()),
        };
        let rejected = fx.service.update_status(&fx.owner(), first.id, reject).await;
        assert!(matches!(rejected, Err(AppError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn owner_is_notified_of_new_request() {
        let fx = fixture().await;
        let rental = fx.book("2024-06-01", "2024-06-03").await.expect("booked");

        let inbox: Vec<Notification> = fx.store.notifications_for(fx.owner.id).await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, "rental_request");
        assert_eq!(inbox[0].data["rentalId"], rental.id.to_string());
    }

    #[rstest]
    #[case(None, Some("2024-06-03"), "startDate is required")]
    #[case(Some("2024-06-01"), None, "endDate is required")]
    #[case(Some("01/06/2024"), Some("2024-06-03"), "startDate must be a date in YYYY-MM-DD format")]
    #[case(Some("2024-06-03"), Some("2024-06-01"), "endDate must be after startDate")]
    #[case(Some("2024-06-01"), Some("2024-06-01"), "endDate must be after startDate")]
    #[case(Some("2024-05-19"), Some("2024-05-22"), "startDate cannot be in the past")]
    #[tokio::test]
    async fn invalid_dates_are_named(
        #[case] start: Option<&str>,
        #[case] end: Option<&str>,
        #[case] message: &str,
    ) {
        let fx = fixture().await;
        let mut req = request(fx.car.id, "2024-06-01", "2024-06-03");
        req.start_date = start.map(str::to_owned);
        req.end_date = end.map(str::to_owned);

        let err = fx.service.create(&fx.renter(), req).await.expect_err("invalid");
        assert!(matches!(err, AppError::Validation(ref m) if m == message), "{err:?}");
    }

    #[tokio::test]
    async fn start_today_is_allowed_and_timestamps_are_accepted() {
        let fx = fixture().await;
        let rental = fx
            .book("2024-05-20", "2024-05-21T09:30:00.000Z")
            .await
            .expect("booked");
        assert_eq!(rental.end_date, date(5, 21));
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let fx = fixture().await;
        let mut req = request(fx.car.id, "2024-06-01", "2024-06-03");
        req.car_id = None;
        let err = fx.service.create(&fx.renter(), req).await.expect_err("invalid");
        assert!(matches!(err, AppError::Validation(ref m) if m == "carId is required"));

        let mut req = request(fx.car.id, "2024-06-01", "2024-06-03");
        req.pickup_location = Some("   ".to_owned());
        let err = fx.service.create(&fx.renter(), req).await.expect_err("invalid");
        assert!(matches!(err, AppError::Validation(ref m) if m == "pickupLocation is required"));
    }

    #[tokio::test]
    async fn unknown_car_is_not_found() {
        let fx = fixture().await;
        let err = fx
            .service
            .create(&fx.renter(), request(Uuid::new_v4(), "2024-06-01", "2024-06-03"))
            .await
            .expect_err("no such car");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn unlisted_car_cannot_be_booked() {
        let fx = fixture().await;
        let unlist = UpdateCarRequest {
            is_available: Some(false),
            ..Default::default()
        };
        fx.store.update_car(fx.car.id, &unlist).await.expect("updated");
        let err = fx.book("2024-06-01", "2024-06-03").await.expect_err("unlisted");
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn rate_change_does_not_reprice_existing_rentals() {
        let fx = fixture().await;
        let rental = fx.book("2024-06-01", "2024-06-03").await.expect("booked");

        let reprice = UpdateCarRequest {
            daily_rate: Some(80),
            ..Default::default()
        };
        fx.store.update_car(fx.car.id, &reprice).await.expect("updated");

        let stored = fx.service.get(&fx.renter(), rental.id).await.expect("visible");
        assert_eq!(stored.daily_rate, 50);
        assert_eq!(stored.total_cost, 100);

        let later = fx.book("2024-07-01", "2024-07-03").await.expect("booked");
        assert_eq!(later.total_cost, 160);
    }

    #[tokio::test]
    async fn concurrent_overlapping_requests_book_once() {
        let fx = fixture().await;
        let (a, b) = tokio::join!(fx.book("2024-06-01", "2024-06-05"), fx.book("2024-06-03", "2024-06-08"));

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let (_, total) = fx
            .store
            .list_rentals(RentalScope::Owner(fx.owner.id), Page::default())
            .await
            .expect("listed");
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn notification_outage_does_not_fail_booking() {
        let mut notifications = MockNotificationStore::new();
        notifications
            .expect_insert_notification()
            .returning(|_| Err(StoreError::Database(sqlx::Error::PoolTimedOut)));
        let fx = fixture_with(Some(Arc::new(notifications))).await;

        let rental = fx.book("2024-06-01", "2024-06-03").await.expect("booked anyway");
        let confirmed = fx
            .service
            .update_status(&fx.owner(), rental.id, status("confirmed"))
            .await
            .expect("confirmed anyway");
        assert_eq!(confirmed.status, RentalStatus::Confirmed);
    }

    #[rstest]
    #[case("rejected")]
    #[case("cancelled")]
    #[tokio::test]
    async fn terminal_rentals_never_move_again(#[case] terminal: &str) {
        let fx = fixture().await;
        let rental = fx.book("2024-06-01", "2024-06-03").await.expect("booked");
        let first = StatusChangeRequest {
            status: Some(terminal.to_owned()),
            rejection_reason: Some("car in service".to_owned()),
        };
        fx.service
            .update_status(&fx.owner(), rental.id, first)
            .await
            .expect("first transition");

        for next in ["confirmed", "completed", "cancelled"] {
            let err = fx
                .service
                .update_status(&fx.owner(), rental.id, status(next))
                .await
                .expect_err("terminal");
            assert!(matches!(err, AppError::InvalidTransition(_)), "{next}: {err:?}");
        }
    }

    #[tokio::test]
    async fn rejection_needs_reason_and_frees_dates() {
        let fx = fixture().await;
        let rental = fx.book("2024-06-01", "2024-06-03").await.expect("booked");

        let err = fx
            .service
            .update_status(&fx.owner(), rental.id, status("rejected"))
            .await
            .expect_err("reason missing");
        assert!(matches!(err, AppError::Validation(ref m) if m == "rejectionReason is required"));

        let reject = StatusChangeRequest {
            status: Some("rejected".to_owned()),
            rejection_reason: Some("car in service".to_owned()),
        };
        let rejected = fx
            .service
            .update_status(&fx.owner(), rental.id, reject)
            .await
            .expect("rejected");
        assert_eq!(rejected.rejection_reason.as_deref(), Some("car in service"));

        let renter_inbox = fx.store.notifications_for(fx.renter.id).await;
        assert!(renter_inbox.iter().any(|n| n.message.contains("car in service")));

        fx.book("2024-06-01", "2024-06-03").await.expect("dates free again");
    }

    #[rstest]
    #[case("pending")]
    #[case("payment_failed")]
    #[case("archived")]
    #[tokio::test]
    async fn unrequestable_statuses_are_rejected(#[case] to: &str) {
        let fx = fixture().await;
        let rental = fx.book("2024-06-01", "2024-06-03").await.expect("booked");
        let err = fx
            .service
            .update_status(&fx.owner(), rental.id, status(to))
            .await
            .expect_err("not requestable");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn renter_cannot_confirm_own_rental() {
        let fx = fixture().await;
        let rental = fx.book("2024-06-01", "2024-06-03").await.expect("booked");
        let err = fx
            .service
            .update_status(&fx.renter(), rental.id, status("confirmed"))
            .await
            .expect_err("not the owner");
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn confirmed_cancellation_refunds() {
        let fx = fixture().await;
        let rental = fx.book("2024-06-01", "2024-06-03").await.expect("booked");
        fx.service
            .update_status(&fx.owner(), rental.id, status("confirmed"))
            .await
            .expect("confirmed");

        let cancelled = fx.service.cancel(&fx.renter(), rental.id).await.expect("cancelled");
        assert_eq!(cancelled.status, RentalStatus::Cancelled);
        assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn started_rental_cannot_be_cancelled() {
        let fx = fixture().await;
        let rental = fx.book("2024-05-20", "2024-05-23").await.expect("booked");
        let err = fx.service.cancel(&fx.owner(), rental.id).await.expect_err("started");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn strangers_see_nothing() {
        let fx = fixture().await;
        let rental = fx.book("2024-06-01", "2024-06-03").await.expect("booked");
        let stranger = Actor {
            id: Uuid::new_v4(),
            role: Role::User,
        };

        assert!(matches!(fx.service.get(&stranger, rental.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(fx.service.cancel(&stranger, rental.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            fx.service.list_for_owner(&stranger, fx.owner.id, Page::default()).await,
            Err(AppError::Forbidden(_))
        ));

        let admin = Actor {
            id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let listed = fx
            .service
            .list_for_renter(&admin, fx.renter.id, Page::default())
            .await
            .expect("admin lists");
        assert_eq!(listed.total, 1);
    }

    #[tokio::test]
    async fn availability_pre_check_tracks_bookings() {
        let fx = fixture().await;
        let before = fx
            .service
            .check_availability(fx.car.id, Some("2024-06-02"), Some("2024-06-04"))
            .await
            .expect("checked");
        assert!(before.available);

        fx.book("2024-06-01", "2024-06-03").await.expect("booked");
        let after = fx
            .service
            .check_availability(fx.car.id, Some("2024-06-02"), Some("2024-06-04"))
            .await
            .expect("checked");
        assert!(!after.available);

        let touching = fx
            .service
            .check_availability(fx.car.id, Some("2024-06-04"), Some("2024-06-06"))
            .await
            .expect("checked");
        assert!(touching.available);
    }
}
