//! Date-range availability of a car.

use uuid::Uuid;

use crate::model::rental::{DateRange, Rental};
use crate::store::{RentalStore, StoreError};

/// Inclusive-date overlap: `[a.start, a.end]` and `[b.start, b.end]` share at least one day.
pub fn ranges_overlap(a: DateRange, b: DateRange) -> bool {
    a.start() <= b.end() && a.end() >= b.start()
}

/// Whether `existing` stops `candidate` from being booked on the same car.
pub fn conflicts_with(existing: &Rental, candidate: DateRange) -> bool {
    if !existing.status.blocks_calendar() {
        return false;
    }
    existing
        .range()
        .is_some_and(|range| ranges_overlap(range, candidate))
}

/// Advisory check. The authoritative one runs inside the store's booking transaction.
pub async fn is_car_available(
    store: &dyn RentalStore,
    car_id: Uuid,
    range: DateRange,
) -> Result<bool, StoreError> {
    Ok(!store.has_blocking_rental(car_id, range).await?)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rstest::rstest;

    use super::*;
    use crate::model::rental::{PaymentStatus, RentalStatus};
    use crate::store::MockRentalStore;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).expect("valid date")
    }

    fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
        DateRange::new(start, end).expect("valid range")
    }

    fn rental(status: RentalStatus, start: NaiveDate, end: NaiveDate) -> Rental {
        Rental {
            id: Uuid::new_v4(),
            car_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            start_date: start,
            end_date: end,
            total_days: (end - start).num_days(),
            daily_rate: 50,
            total_cost: 50 * (end - start).num_days(),
            status,
            payment_status: PaymentStatus::Pending,
            payment_method: "card".to_owned(),
            payment_reference: None,
            pickup_location: "Airport".to_owned(),
            dropoff_location: "Airport".to_owned(),
            rejection_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[rstest]
    #[case(date(6, 2), date(6, 4), true)]
    #[case(date(5, 28), date(6, 1), true)]
    #[case(date(6, 3), date(6, 5), true)]
    #[case(date(5, 25), date(6, 10), true)]
    #[case(date(6, 4), date(6, 6), false)]
    #[case(date(5, 20), date(5, 31), false)]
    fn overlap_is_inclusive_on_both_ends(
        #[case] start: NaiveDate,
        #[case] end: NaiveDate,
        #[case] expected: bool,
    ) {
        let existing = range(date(6, 1), date(6, 3));
        assert_eq!(ranges_overlap(existing, range(start, end)), expected);
        assert_eq!(ranges_overlap(range(start, end), existing), expected);
    }

    #[rstest]
    #[case(RentalStatus::Pending, true)]
    #[case(RentalStatus::Confirmed, true)]
    #[case(RentalStatus::Rejected, false)]
    #[case(RentalStatus::Cancelled, false)]
    #[case(RentalStatus::Completed, false)]
    #[case(RentalStatus::PaymentFailed, false)]
    fn only_pending_and_confirmed_rentals_block(#[case] status: RentalStatus, #[case] blocks: bool) {
        let existing = rental(status, date(6, 1), date(6, 3));
        assert_eq!(conflicts_with(&existing, range(date(6, 2), date(6, 4))), blocks);
    }

    #[test]
    fn rejected_rental_frees_its_dates() {
        let existing = rental(RentalStatus::Rejected, date(6, 1), date(6, 3));
        assert!(!conflicts_with(&existing, range(date(6, 1), date(6, 3))));
    }

    #[tokio::test]
    async fn advisory_check_inverts_store_answer() {
        let mut store = MockRentalStore::new();
        store
            .expect_has_blocking_rental()
            .times(1)
            .returning(|_, _| Ok(true));

        let available = is_car_available(&store, Uuid::new_v4(), range(date(6, 1), date(6, 3)))
            .await
            .expect("store answers");
        assert!(!available);
    }
}
