use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a rental, stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum RentalStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
    /// Bookkeeping marker set by payment reconciliation. Terminal.
    PaymentFailed,
}

impl RentalStatus {
    /// Statuses that occupy the car's calendar.
    pub const BLOCKING: [RentalStatus; 2] = [RentalStatus::Pending, RentalStatus::Confirmed];

    pub fn is_terminal(self) -> bool {
        !matches!(self, RentalStatus::Pending | RentalStatus::Confirmed)
    }

    pub fn blocks_calendar(self) -> bool {
        Self::BLOCKING.contains(&self)
    }
}

/// Wording for user-facing messages.
impl fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RentalStatus::Pending => "pending",
            RentalStatus::Confirmed => "confirmed",
            RentalStatus::Rejected => "rejected",
            RentalStatus::Cancelled => "cancelled",
            RentalStatus::Completed => "completed",
            RentalStatus::PaymentFailed => "payment failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

/// Calendar date range with `start < end`. Both ends are inclusive for overlap purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Returns `None` unless `start` is strictly before `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Whole days between start and end. Always at least one.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// Price of a range at a given daily rate, frozen onto the rental at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub total_days: i64,
    pub daily_rate: i64,
    pub total_cost: i64,
}

impl Quote {
    /// `None` when the cost does not fit in an `i64`.
    pub fn for_range(range: DateRange, daily_rate: i64) -> Option<Self> {
        let total_days = range.days();
        let total_cost = total_days.checked_mul(daily_rate)?;
        Some(Self {
            total_days,
            daily_rate,
            total_cost,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Rental {
    pub id: Uuid,
    pub car_id: Uuid,
    /// Renter.
    pub user_id: Uuid,
    /// Owner of the rented car, joined in for authorization.
    pub owner_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: i64,
    pub daily_rate: i64,
    pub total_cost: i64,
    pub status: RentalStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub payment_reference: Option<String>,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rental {
    pub fn range(&self) -> Option<DateRange> {
        DateRange::new(self.start_date, self.end_date)
    }

    /// A rental has started once its first day is today or in the past.
    pub fn has_started(&self, today: NaiveDate) -> bool {
        self.start_date <= today
    }
}

/// Validated booking request handed to the store, which prices it under the car lock.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRental {
    pub car_id: Uuid,
    pub user_id: Uuid,
    pub range: DateRange,
    pub payment_method: String,
    pub pickup_location: String,
    pub dropoff_location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RentalScope {
    Renter(Uuid),
    Owner(Uuid),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRentalRequest {
    pub car_id: Option<Uuid>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub pickup_location: Option<String>,
    pub dropoff_location: Option<String>,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
    pub status: Option<String>,
    pub rejection_reason: Option<String>,
}
