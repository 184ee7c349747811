pub mod availability;
pub mod clock;
pub mod lifecycle;
pub mod notify;
pub mod payments;
pub mod rentals;

/// How often a compare-and-set rental change is re-decided after losing a race.
pub(crate) const MAX_CHANGE_ATTEMPTS: usize = 3;
