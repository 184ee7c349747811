//! Postgres adapter over a shared `PgPool`.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use super::{NotificationStore, RentalChange, RentalStore, StoreError};
use crate::model::car::{Car, CarQuery, CreateCarRequest, UpdateCarRequest};
use crate::model::notification::{NewNotification, Notification};
use crate::model::page::Page;
use crate::model::payment::Payment;
use crate::model::rental::{DateRange, NewRental, Quote, Rental, RentalScope};
use crate::model::user::User;

const CAR_COLUMNS: &str =
    "id, owner_id, make, model, year, daily_rate, is_available, created_at, updated_at";

/// Rental columns with the owning car's `owner_id`; `r` is the rental, `c` the car.
const RENTAL_COLUMNS: &str = "r.id, r.car_id, r.user_id, c.owner_id, r.start_date, r.end_date, \
     r.total_days, r.daily_rate, r.total_cost, r.status, r.payment_status, r.payment_method, \
     r.payment_reference, r.pickup_location, r.dropoff_location, r.rejection_reason, \
     r.created_at, r.updated_at";

const PAYMENT_COLUMNS: &str = "id, rental_id, user_id, amount, currency, payment_method, \
     payment_status, payment_reference, payment_date, created_at";

const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, type, data, is_read, created_at";

/// `RentalStatus::BLOCKING` as SQL; same predicate as the `rentals_no_overlap` constraint.
const BLOCKING_FILTER: &str = "status IN ('pending', 'confirmed')";

/// SQLSTATE for `exclusion_violation`, raised by the rentals overlap constraint.
const EXCLUSION_VIOLATION: &str = "23P01";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_exclusion_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(EXCLUSION_VIOLATION),
        _ => false,
    }
}

#[async_trait]
impl RentalStore for PgStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, full_name, email, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_car(&self, id: Uuid) -> Result<Option<Car>, StoreError> {
        let car = sqlx::query_as::<_, Car>(&format!("SELECT {CAR_COLUMNS} FROM cars WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(car)
    }

    async fn list_cars(&self, query: &CarQuery, page: Page) -> Result<(Vec<Car>, i64), StoreError> {
        let mut where_clauses = Vec::new();
        let mut param_count = 1;

        if query.make.is_some() {
            where_clauses.push(format!("make = ${param_count}"));
            param_count += 1;
        }
        if query.available_only.unwrap_or(false) {
            where_clauses.push("is_available = TRUE".to_owned());
        }

        let where_clause = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM cars {where_clause}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(make) = &query.make {
            count_query = count_query.bind(make);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let fetch_sql = format!(
            "SELECT {CAR_COLUMNS} FROM cars {where_clause} ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            param_count,
            param_count + 1
        );
        let mut fetch_query = sqlx::query_as::<_, Car>(&fetch_sql);
        if let Some(make) = &query.make {
            fetch_query = fetch_query.bind(make);
        }
        let cars = fetch_query
            .bind(page.limit)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        Ok((cars, total))
    }

    async fn insert_car(&self, owner_id: Uuid, request: &CreateCarRequest) -> Result<Car, StoreError> {
        let car = sqlx::query_as::<_, Car>(&format!(
            "INSERT INTO cars (id, owner_id, make, model, year, daily_rate, is_available) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {CAR_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(&request.make)
        .bind(&request.model)
        .bind(request.year)
        .bind(request.daily_rate)
        .bind(request.is_available.unwrap_or(true))
        .fetch_one(&self.pool)
        .await?;
        Ok(car)
    }

    async fn update_car(&self, id: Uuid, request: &UpdateCarRequest) -> Result<Option<Car>, StoreError> {
        let mut set_parts = Vec::new();
        let mut param_count = 1;
        for (column, present) in [
            ("make", request.make.is_some()),
            ("model", request.model.is_some()),
            ("year", request.year.is_some()),
            ("daily_rate", request.daily_rate.is_some()),
            ("is_available", request.is_available.is_some()),
        ] {
            if present {
                set_parts.push(format!("{column} = ${param_count}"));
                param_count += 1;
            }
        }
        if set_parts.is_empty() {
            return self.find_car(id).await;
        }
        set_parts.push("updated_at = NOW()".to_owned());

        let sql = format!(
            "UPDATE cars SET {} WHERE id = ${param_count} RETURNING {CAR_COLUMNS}",
            set_parts.join(", ")
        );
        // Bind in the same order as set_parts.
        let mut query = sqlx::query_as::<_, Car>(&sql);
        if let Some(make) = &request.make {
            query = query.bind(make);
        }
        if let Some(model) = &request.model {
            query = query.bind(model);
        }
        if let Some(year) = request.year {
            query = query.bind(year);
        }
        if let Some(daily_rate) = request.daily_rate {
            query = query.bind(daily_rate);
        }
        if let Some(is_available) = request.is_available {
            query = query.bind(is_available);
        }
        let car = query.bind(id).fetch_optional(&self.pool).await?;
        Ok(car)
    }

    async fn has_blocking_rental(&self, car_id: Uuid, range: DateRange) -> Result<bool, StoreError> {
        let blocked = sqlx::query_scalar::<_, bool>(&format!(
            "SELECT EXISTS (SELECT 1 FROM rentals WHERE car_id = $1 AND {BLOCKING_FILTER} \
             AND start_date <= $3 AND end_date >= $2)"
        ))
        .bind(car_id)
        .bind(range.start())
        .bind(range.end())
        .fetch_one(&self.pool)
        .await?;
        Ok(blocked)
    }

    async fn insert_rental(&self, rental: &NewRental) -> Result<Rental, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialises bookings of the same car across server processes.
        let daily_rate: i64 = sqlx::query_scalar("SELECT daily_rate FROM cars WHERE id = $1 FOR UPDATE")
            .bind(rental.car_id)
            .fetch_optional(&mut tx)
            .await?
            .ok_or(StoreError::CarNotFound(rental.car_id))?;

        let blocked = sqlx::query_scalar::<_, bool>(&format!(
            "SELECT EXISTS (SELECT 1 FROM rentals WHERE car_id = $1 AND {BLOCKING_FILTER} \
             AND start_date <= $3 AND end_date >= $2)"
        ))
        .bind(rental.car_id)
        .bind(rental.range.start())
        .bind(rental.range.end())
        .fetch_one(&mut tx)
        .await?;
        if blocked {
            debug!(car_id = %rental.car_id, "booking refused: dates taken");
            return Err(StoreError::Unavailable);
        }

        let quote = Quote::for_range(rental.range, daily_rate).ok_or(StoreError::CostOverflow)?;
        let sql = format!(
            "WITH r AS ( \
                 INSERT INTO rentals (id, car_id, user_id, start_date, end_date, total_days, \
                     daily_rate, total_cost, status, payment_status, payment_method, \
                     pickup_location, dropoff_location) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', 'pending', $9, $10, $11) \
                 RETURNING * \
             ) SELECT {RENTAL_COLUMNS} FROM r JOIN cars c ON c.id = r.car_id"
        );
        let created = sqlx::query_as::<_, Rental>(&sql)
            .bind(Uuid::new_v4())
            .bind(rental.car_id)
            .bind(rental.user_id)
            .bind(rental.range.start())
            .bind(rental.range.end())
            .bind(quote.total_days)
            .bind(quote.daily_rate)
            .bind(quote.total_cost)
            .bind(&rental.payment_method)
            .bind(&rental.pickup_location)
            .bind(&rental.dropoff_location)
            .fetch_one(&mut tx)
            .await
            .map_err(|err| {
                if is_exclusion_violation(&err) {
                    StoreError::Unavailable
                } else {
                    StoreError::Database(err)
                }
            })?;

        tx.commit().await?;
        Ok(created)
    }

    async fn find_rental(&self, id: Uuid) -> Result<Option<Rental>, StoreError> {
        let rental = sqlx::query_as::<_, Rental>(&format!(
            "SELECT {RENTAL_COLUMNS} FROM rentals r JOIN cars c ON c.id = r.car_id WHERE r.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rental)
    }

    async fn find_rental_by_payment_reference(&self, reference: &str) -> Result<Option<Rental>, StoreError> {
        let rental = sqlx::query_as::<_, Rental>(&format!(
            "SELECT {RENTAL_COLUMNS} FROM rentals r JOIN cars c ON c.id = r.car_id \
             WHERE r.payment_reference = $1 ORDER BY r.updated_at DESC LIMIT 1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rental)
    }

    async fn list_rentals(&self, scope: RentalScope, page: Page) -> Result<(Vec<Rental>, i64), StoreError> {
        let (filter, subject) = match scope {
            RentalScope::Renter(user_id) => ("r.user_id = $1", user_id),
            RentalScope::Owner(owner_id) => ("c.owner_id = $1", owner_id),
        };

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM rentals r JOIN cars c ON c.id = r.car_id WHERE {filter}"
        ))
        .bind(subject)
        .fetch_one(&self.pool)
        .await?;

        let rentals = sqlx::query_as::<_, Rental>(&format!(
            "SELECT {RENTAL_COLUMNS} FROM rentals r JOIN cars c ON c.id = r.car_id \
             WHERE {filter} ORDER BY r.created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(subject)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        Ok((rentals, total))
    }

    async fn apply_change(&self, change: &RentalChange) -> Result<Option<Rental>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The WHERE clause is re-evaluated under the row lock, so a concurrent writer that
        // committed first makes this match nothing.
        let updated = sqlx::query_as::<_, Rental>(&format!(
            "UPDATE rentals r SET status = $2, payment_status = $3, payment_reference = $4, \
                 rejection_reason = $5, updated_at = NOW() \
             FROM cars c \
             WHERE r.id = $1 AND c.id = r.car_id AND r.status = $6 \
                 AND r.payment_reference IS NOT DISTINCT FROM $7 \
             RETURNING {RENTAL_COLUMNS}"
        ))
        .bind(change.rental_id)
        .bind(change.status)
        .bind(change.payment_status)
        .bind(&change.payment_reference)
        .bind(&change.rejection_reason)
        .bind(change.expected_status)
        .bind(&change.expected_payment_reference)
        .fetch_optional(&mut tx)
        .await?;

        let Some(updated) = updated else {
            return Ok(None);
        };

        if let Some(payment) = &change.payment {
            sqlx::query(
                "INSERT INTO payments (id, rental_id, user_id, amount, currency, payment_method, \
                     payment_status, payment_reference, payment_date) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (rental_id, payment_reference, payment_status) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(payment.rental_id)
            .bind(payment.user_id)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(&payment.payment_method)
            .bind(payment.payment_status)
            .bind(&payment.payment_reference)
            .bind(payment.payment_date)
            .execute(&mut tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn list_payments(&self, rental_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE rental_id = $1 ORDER BY created_at ASC"
        ))
        .bind(rental_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification, StoreError> {
        let saved = sqlx::query_as::<_, Notification>(&format!(
            "INSERT INTO notifications (id, user_id, title, message, type, data) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.kind)
        .bind(&notification.data)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    async fn list_notifications(&self, user_id: Uuid, page: Page) -> Result<(Vec<Notification>, i64), StoreError> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        let items = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        Ok((items, total))
    }

    async fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> Result<Option<Notification>, StoreError> {
        let notification = sqlx::query_as::<_, Notification>(&format!(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND user_id = $2 \
             RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::rental::RentalStatus;

    #[test]
    fn blocking_filter_lists_exactly_the_blocking_statuses() {
        for status in [
            RentalStatus::Pending,
            RentalStatus::Confirmed,
            RentalStatus::Rejected,
            RentalStatus::Cancelled,
            RentalStatus::Completed,
            RentalStatus::PaymentFailed,
        ] {
            let stored = serde_json::to_value(status).expect("serialise");
            let quoted = format!("'{}'", stored.as_str().expect("text"));
            assert_eq!(BLOCKING_FILTER.contains(&quoted), status.blocks_calendar(), "{quoted}");
        }
    }

    #[test]
    fn migration_constraint_uses_the_same_filter() {
        let schema = include_str!("../../migrations/20240601000000_init.sql");
        assert!(schema.contains(&format!("WHERE ({BLOCKING_FILTER})")));
    }
}
