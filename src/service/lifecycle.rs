//! Rental status state machine and the one rule for who may drive it.

use chrono::NaiveDate;

use crate::auth::Actor;
use crate::error::AppError;
use crate::model::rental::{PaymentStatus, Rental, RentalStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("rental is already {0} and can no longer change status")]
    Terminal(RentalStatus),
    #[error("cannot change rental status from {from} to {to}")]
    Illegal { from: RentalStatus, to: RentalStatus },
}

/// A legal edge of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RentalStatus,
    pub to: RentalStatus,
}

impl Transition {
    /// Payment status the rental carries after this edge.
    pub fn payment_status_after(&self, current: PaymentStatus) -> PaymentStatus {
        use RentalStatus::*;
        match (self.from, self.to) {
            (Pending, Confirmed) => PaymentStatus::Paid,
            (Confirmed, Cancelled) if current == PaymentStatus::Paid => PaymentStatus::Refunded,
            (Pending, PaymentFailed) => PaymentStatus::Failed,
            _ => current,
        }
    }
}

/// Checks `from -> to` against the transition table.
pub fn plan_transition(from: RentalStatus, to: RentalStatus) -> Result<Transition, TransitionError> {
    use crate::model::rental::RentalStatus::*;
    if from.is_terminal() {
        return Err(TransitionError::Terminal(from));
    }
    match (from, to) {
        (Pending, Confirmed)
        | (Pending, Rejected)
        | (Pending, Cancelled)
        | (Pending, PaymentFailed)
        | (Confirmed, Completed)
        | (Confirmed, Cancelled) => Ok(Transition { from, to }),
        _ => Err(TransitionError::Illegal { from, to }),
    }
}

/// Car owner or admin.
pub fn can_manage_rental(actor: &Actor, rental: &Rental) -> bool {
    actor.is_admin() || actor.id == rental.owner_id
}

/// Managers plus the renter.
pub fn can_view_rental(actor: &Actor, rental: &Rental) -> bool {
    can_manage_rental(actor, rental) || actor.id == rental.user_id
}

/// Managers may drive any transition; a renter may only cancel their own rental before it
/// starts.
pub fn authorize_transition(
    actor: &Actor,
    rental: &Rental,
    to: RentalStatus,
    today: NaiveDate,
) -> Result<(), AppError> {
    if can_manage_rental(actor, rental) {
        return Ok(());
    }
    if actor.id != rental.user_id || to != RentalStatus::Cancelled {
        return Err(AppError::Forbidden(
            "only the car owner or an admin can change this rental".into(),
        ));
    }
    if rental.has_started(today) {
        return Err(AppError::Validation(
            "rental has already started and can no longer be cancelled".into(),
        ));
    }
    Ok(())
}
