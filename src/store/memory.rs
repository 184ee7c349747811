//! In-process store for tests. One mutex guards everything, which gives every operation the
//! same all-or-nothing behaviour as a Postgres transaction.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NotificationStore, RentalChange, RentalStore, StoreError};
use crate::model::car::{Car, CarQuery, CreateCarRequest, UpdateCarRequest};
use crate::model::notification::{NewNotification, Notification};
use crate::model::page::Page;
use crate::model::payment::Payment;
use crate::model::rental::{DateRange, NewRental, PaymentStatus, Quote, Rental, RentalScope, RentalStatus};
use crate::model::user::{Role, User};
use crate::service::availability::conflicts_with;

#[derive(Default)]
struct MemoryState {
    users: Vec<User>,
    cars: Vec<Car>,
    rentals: Vec<Rental>,
    payments: Vec<Payment>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

fn paginate<T: Clone>(items: Vec<T>, page: Page) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let window = items
        .into_iter()
        .skip(page.offset().max(0) as usize)
        .take(page.limit.max(0) as usize)
        .collect();
    (window, total)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, full_name: &str, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4(),
            full_name: full_name.to_owned(),
            email: format!("{}@example.com", full_name.to_lowercase().replace(' ', ".")),
            role,
            created_at: Utc::now(),
        };
        self.state.lock().await.users.push(user.clone());
        user
    }

    pub async fn add_car(&self, owner_id: Uuid, daily_rate: i64) -> Car {
        let now = Utc::now();
        let car = Car {
            id: Uuid::new_v4(),
            owner_id,
            make: "Toyota".to_owned(),
            model: "Corolla".to_owned(),
            year: 2022,
            daily_rate,
            is_available: true,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.cars.push(car.clone());
        car
    }

    pub async fn payments_for(&self, rental_id: Uuid) -> Vec<Payment> {
        self.state
            .lock()
            .await
            .payments
            .iter()
            .filter(|p| p.rental_id == rental_id)
            .cloned()
            .collect()
    }

    pub async fn notifications_for(&self, user_id: Uuid) -> Vec<Notification> {
        self.state
            .lock()
            .await
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RentalStore for MemoryStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_car(&self, id: Uuid) -> Result<Option<Car>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.cars.iter().find(|c| c.id == id).cloned())
    }

    async fn list_cars(&self, query: &CarQuery, page: Page) -> Result<(Vec<Car>, i64), StoreError> {
        let state = self.state.lock().await;
        let cars = state
            .cars
            .iter()
            .filter(|c| query.make.as_ref().map_or(true, |make| &c.make == make))
            .filter(|c| !query.available_only.unwrap_or(false) || c.is_available)
            .cloned()
            .collect();
        Ok(paginate(cars, page))
    }

    async fn insert_car(&self, owner_id: Uuid, request: &CreateCarRequest) -> Result<Car, StoreError> {
        let now = Utc::now();
        let car = Car {
            id: Uuid::new_v4(),
            owner_id,
            make: request.make.clone(),
            model: request.model.clone(),
            year: request.year,
            daily_rate: request.daily_rate,
            is_available: request.is_available.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.cars.push(car.clone());
        Ok(car)
    }

    async fn update_car(&self, id: Uuid, request: &UpdateCarRequest) -> Result<Option<Car>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(car) = state.cars.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        if let Some(make) = &request.make {
            car.make = make.clone();
        }
        if let Some(model) = &request.model {
            car.model = model.clone();
        }
        if let Some(year) = request.year {
            car.year = year;
        }
        if let Some(daily_rate) = request.daily_rate {
            car.daily_rate = daily_rate;
        }
        if let Some(is_available) = request.is_available {
            car.is_available = is_available;
        }
        car.updated_at = Utc::now();
        Ok(Some(car.clone()))
    }

    async fn has_blocking_rental(&self, car_id: Uuid, range: DateRange) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rentals
            .iter()
            .any(|r| r.car_id == car_id && conflicts_with(r, range)))
    }

    async fn insert_rental(&self, rental: &NewRental) -> Result<Rental, StoreError> {
        let mut state = self.state.lock().await;
        let car = state
            .cars
            .iter()
            .find(|c| c.id == rental.car_id)
            .cloned()
            .ok_or(StoreError::CarNotFound(rental.car_id))?;
        if state
            .rentals
            .iter()
            .any(|r| r.car_id == car.id && conflicts_with(r, rental.range))
        {
            return Err(StoreError::Unavailable);
        }
        let quote = Quote::for_range(rental.range, car.daily_rate).ok_or(StoreError::CostOverflow)?;
        let now = Utc::now();
        let created = Rental {
            id: Uuid::new_v4(),
            car_id: car.id,
            user_id: rental.user_id,
            owner_id: car.owner_id,
            start_date: rental.range.start(),
            end_date: rental.range.end(),
            total_days: quote.total_days,
            daily_rate: quote.daily_rate,
            total_cost: quote.total_cost,
            status: RentalStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: rental.payment_method.clone(),
            payment_reference: None,
            pickup_location: rental.pickup_location.clone(),
            dropoff_location: rental.dropoff_location.clone(),
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.rentals.push(created.clone());
        Ok(created)
    }

    async fn find_rental(&self, id: Uuid) -> Result<Option<Rental>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.rentals.iter().find(|r| r.id == id).cloned())
    }

    async fn find_rental_by_payment_reference(&self, reference: &str) -> Result<Option<Rental>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rentals
            .iter()
            .find(|r| r.payment_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn list_rentals(&self, scope: RentalScope, page: Page) -> Result<(Vec<Rental>, i64), StoreError> {
        let state = self.state.lock().await;
        let rentals = state
            .rentals
            .iter()
            .rev()
            .filter(|r| match scope {
                RentalScope::Renter(user_id) => r.user_id == user_id,
                RentalScope::Owner(owner_id) => r.owner_id == owner_id,
            })
            .cloned()
            .collect();
        Ok(paginate(rentals, page))
    }

    async fn apply_change(&self, change: &RentalChange) -> Result<Option<Rental>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(rental) = state.rentals.iter_mut().find(|r| r.id == change.rental_id) else {
            return Ok(None);
        };
        if rental.status != change.expected_status
            || rental.payment_reference != change.expected_payment_reference
        {
            return Ok(None);
        }
        rental.status = change.status;
        rental.payment_status = change.payment_status;
        rental.payment_reference = change.payment_reference.clone();
        rental.rejection_reason = change.rejection_reason.clone();
        rental.updated_at = Utc::now();
        let updated = rental.clone();

        if let Some(payment) = &change.payment {
            let duplicate = state.payments.iter().any(|p| {
                p.rental_id == payment.rental_id
                    && p.payment_reference == payment.payment_reference
                    && p.payment_status == payment.payment_status
            });
            if !duplicate {
                state.payments.push(Payment {
                    id: Uuid::new_v4(),
                    rental_id: payment.rental_id,
                    user_id: payment.user_id,
                    amount: payment.amount,
                    currency: payment.currency.clone(),
                    payment_method: payment.payment_method.clone(),
                    payment_status: payment.payment_status,
                    payment_reference: payment.payment_reference.clone(),
                    payment_date: payment.payment_date,
                    created_at: Utc::now(),
                });
            }
        }
        Ok(Some(updated))
    }

    async fn list_payments(&self, rental_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        Ok(self.payments_for(rental_id).await)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification, StoreError> {
        let saved = Notification {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            title: notification.title.clone(),
            message: notification.message.clone(),
            kind: notification.kind.clone(),
            data: notification.data.clone(),
            is_read: false,
            created_at: Utc::now(),
        };
        self.state.lock().await.notifications.push(saved.clone());
        Ok(saved)
    }

    async fn list_notifications(&self, user_id: Uuid, page: Page) -> Result<(Vec<Notification>, i64), StoreError> {
        let state = self.state.lock().await;
        let items = state
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        Ok(paginate(items, page))
    }

    async fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> Result<Option<Notification>, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
            .map(|n| {
                n.is_read = true;
                n.clone()
            }))
    }
}
