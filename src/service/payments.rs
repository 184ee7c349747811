//! Hosted checkout initiation and webhook-driven payment reconciliation.
//!
//! Provider events arrive at least once and in any order. Each one is decided against the
//! rental as currently persisted and applied with a compare-and-set, so a duplicate or a
//! late event finds the work already done and becomes a no-op.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::lifecycle::{can_view_rental, plan_transition};
use super::notify::{self, Notifier};
use super::MAX_CHANGE_ATTEMPTS;
use crate::auth::Actor;
use crate::error::{AppError, AppResult};
use crate::model::payment::{CheckoutSession, CheckoutSessionRequest, NewPayment, PaymentEvent};
use crate::model::rental::{PaymentStatus, Rental, RentalStatus};
use crate::store::{RentalChange, RentalStore, StoreError};
use crate::stripe::checkout::{CheckoutProvider, CheckoutRequest};
use crate::stripe::event::parse_event;
use crate::stripe::signature::WebhookVerifier;

/// What reconciliation should do with one event for one rental.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// `pending -> confirmed`, paid, payment recorded.
    Confirm,
    /// Already confirmed by hand; record the provider's payment without a status change.
    RecordPayment,
    /// `pending -> payment_failed`.
    MarkFailed,
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Same payment already reconciled.
    AlreadyApplied,
    /// Confirmed under a different payment reference.
    PaidElsewhere,
    /// Failure arriving after the rental was confirmed.
    LateFailure,
    /// Rental is terminal.
    Closed(RentalStatus),
}

/// Outcome reported back to the webhook caller (and the logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied(Reconciliation),
    Skipped(SkipReason),
    RentalNotFound,
    Ignored,
}

/// Decides how `event` affects `rental`. Pure; the caller applies the result.
pub fn plan_reconciliation(rental: &Rental, event: &PaymentEvent) -> Reconciliation {
    let same_payment = rental.payment_reference.as_deref() == Some(event.reference.as_str());
    if event.kind.is_success() {
        match rental.status {
            RentalStatus::Pending => Reconciliation::Confirm,
            RentalStatus::Confirmed if same_payment => Reconciliation::Skip(SkipReason::AlreadyApplied),
            RentalStatus::Confirmed if rental.payment_reference.is_none() => Reconciliation::RecordPayment,
            RentalStatus::Confirmed => Reconciliation::Skip(SkipReason::PaidElsewhere),
            closed => Reconciliation::Skip(SkipReason::Closed(closed)),
        }
    } else {
        match rental.status {
            RentalStatus::Pending => Reconciliation::MarkFailed,
            RentalStatus::Confirmed => Reconciliation::Skip(SkipReason::LateFailure),
            RentalStatus::PaymentFailed if same_payment => Reconciliation::Skip(SkipReason::AlreadyApplied),
            closed => Reconciliation::Skip(SkipReason::Closed(closed)),
        }
    }
}

fn log_skip(rental: &Rental, event: &PaymentEvent, reason: SkipReason) {
    match reason {
        SkipReason::PaidElsewhere | SkipReason::Closed(_) if event.kind.is_success() => warn!(
            rental_id = %rental.id,
            event_id = %event.event_id,
            reference = %event.reference,
            ?reason,
            "payment succeeded for a rental that can no longer take it, needs manual follow-up"
        ),
        _ => info!(rental_id = %rental.id, event_id = %event.event_id, ?reason, "payment event skipped"),
    }
}

/// Deployment-specific checkout settings.
#[derive(Debug, Clone)]
pub struct CheckoutOptions {
    pub currency: String,
    /// Base URL of the web client; Stripe redirects back there.
    pub client_url: String,
}

pub struct PaymentService {
    store: Arc<dyn RentalStore>,
    notifier: Notifier,
    checkout: Arc<dyn CheckoutProvider>,
    verifier: WebhookVerifier,
    clock: Arc<dyn Clock>,
    options: CheckoutOptions,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn RentalStore>,
        notifier: Notifier,
        checkout: Arc<dyn CheckoutProvider>,
        verifier: WebhookVerifier,
        clock: Arc<dyn Clock>,
        options: CheckoutOptions,
    ) -> Self {
        Self {
            store,
            notifier,
            checkout,
            verifier,
            clock,
            options,
        }
    }

    /// Opens a hosted checkout for the renter's pending rental. Rental state is untouched;
    /// the outcome arrives later through the webhook.
    pub async fn create_checkout_session(
        &self,
        actor: &Actor,
        request: CheckoutSessionRequest,
    ) -> AppResult<CheckoutSession> {
        let rental_id = request
            .rental_id
            .ok_or_else(|| AppError::Validation("rentalId is required".into()))?;
        let rental = self
            .store
            .find_rental(rental_id)
            .await?
            .filter(|rental| can_view_rental(actor, rental))
            .ok_or_else(|| AppError::NotFound("Rental not found".into()))?;
        if rental.user_id != actor.id {
            return Err(AppError::Forbidden("only the renter can pay for this rental".into()));
        }
        if rental.status != RentalStatus::Pending {
            return Err(AppError::Validation(format!(
                "rental is {} and can no longer be paid",
                rental.status
            )));
        }

        let description = match self.store.find_car(rental.car_id).await? {
            Some(car) => format!(
                "{} {} {}, {} to {}",
                car.year, car.make, car.model, rental.start_date, rental.end_date
            ),
            None => format!("Car rental, {} to {}", rental.start_date, rental.end_date),
        };
        let client = &self.options.client_url;
        let checkout_request = CheckoutRequest {
            rental_id,
            amount: rental.total_cost,
            currency: self.options.currency.clone(),
            description,
            success_url: format!(
                "{client}/payment/success?session_id={{CHECKOUT_SESSION_ID}}&rentalId={rental_id}"
            ),
            cancel_url: format!("{client}/payment/cancel?rentalId={rental_id}"),
        };

        let session = self
            .checkout
            .create_session(&checkout_request)
            .await
            .map_err(|err| {
                error!(%rental_id, error = %err, "checkout session creation failed");
                AppError::ExternalService(err.to_string())
            })?;
        info!(%rental_id, session_id = %session.session_id, "checkout session created");
        Ok(session)
    }

    /// Verifies, decodes and reconciles one webhook delivery.
    ///
    /// Signature or payload problems are `Validation` errors and touch nothing. Store failures
    /// surface as `Internal` so the provider redelivers.
    pub async fn handle_webhook(&self, signature: Option<&str>, body: &[u8]) -> AppResult<WebhookOutcome> {
        if let Err(err) = self.verifier.verify(signature, body, self.clock.now()) {
            warn!(error = %err, "webhook signature verification failed");
            return Err(AppError::Validation(format!("Webhook signature verification failed: {err}")));
        }

        let event = match parse_event(body) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("webhook event type not handled");
                return Ok(WebhookOutcome::Ignored);
            }
            Err(err) => {
                warn!(error = %err, "verified webhook has an invalid payload");
                return Err(AppError::Validation(err.to_string()));
            }
        };

        self.reconcile(&event).await.map_err(|err| {
            error!(event_id = %event.event_id, error = %err, "payment reconciliation failed");
            err
        })
    }

    async fn find_rental(&self, event: &PaymentEvent) -> Result<Option<Rental>, StoreError> {
        if let Some(rental_id) = event.rental_id {
            if let Some(rental) = self.store.find_rental(rental_id).await? {
                return Ok(Some(rental));
            }
        }
        self.store.find_rental_by_payment_reference(&event.reference).await
    }

    fn payment_row(&self, rental: &Rental, event: &PaymentEvent, status: PaymentStatus) -> NewPayment {
        let amount = event.amount.unwrap_or(rental.total_cost);
        if amount != rental.total_cost {
            warn!(
                rental_id = %rental.id,
                expected = rental.total_cost,
                received = amount,
                "provider amount differs from rental cost"
            );
        }
        NewPayment {
            rental_id: rental.id,
            user_id: rental.user_id,
            amount,
            currency: event
                .currency
                .clone()
                .unwrap_or_else(|| self.options.currency.clone()),
            payment_method: rental.payment_method.clone(),
            payment_status: status,
            payment_reference: event.reference.clone(),
            payment_date: self.clock.now(),
        }
    }

    fn change_for(&self, rental: &Rental, event: &PaymentEvent, plan: Reconciliation) -> AppResult<RentalChange> {
        let change = match plan {
            Reconciliation::Confirm => {
                let transition = plan_transition(rental.status, RentalStatus::Confirmed)?;
                RentalChange::on(rental)
                    .status(transition.to)
                    .payment_status(transition.payment_status_after(rental.payment_status))
                    .payment_reference(event.reference.clone())
                    .record_payment(self.payment_row(rental, event, PaymentStatus::Paid))
            }
            Reconciliation::RecordPayment => RentalChange::on(rental)
                .payment_status(PaymentStatus::Paid)
                .payment_reference(event.reference.clone())
                .record_payment(self.payment_row(rental, event, PaymentStatus::Paid)),
            Reconciliation::MarkFailed => {
                let transition = plan_transition(rental.status, RentalStatus::PaymentFailed)?;
                RentalChange::on(rental)
                    .status(transition.to)
                    .payment_status(transition.payment_status_after(rental.payment_status))
                    .payment_reference(event.reference.clone())
                    .record_payment(self.payment_row(rental, event, PaymentStatus::Failed))
            }
            Reconciliation::Skip(reason) => {
                return Err(AppError::Internal(format!("nothing to apply for {reason:?}")))
            }
        };
        Ok(change)
    }

    async fn reconcile(&self, event: &PaymentEvent) -> AppResult<WebhookOutcome> {
        for attempt in 1..=MAX_CHANGE_ATTEMPTS {
            let Some(rental) = self.find_rental(event).await? else {
                warn!(
                    event_id = %event.event_id,
                    reference = %event.reference,
                    rental_id = ?event.rental_id,
                    "payment event for unknown rental, acknowledging"
                );
                return Ok(WebhookOutcome::RentalNotFound);
            };

            let plan = plan_reconciliation(&rental, event);
            if let Reconciliation::Skip(reason) = plan {
                log_skip(&rental, event, reason);
                return Ok(WebhookOutcome::Skipped(reason));
            }
            let change = self.change_for(&rental, event, plan)?;

            match self.store.apply_change(&change).await? {
                Some(updated) => {
                    info!(
                        rental_id = %updated.id,
                        event_id = %event.event_id,
                        reference = %event.reference,
                        ?plan,
                        status = ?updated.status,
                        payment_status = ?updated.payment_status,
                        "payment reconciled"
                    );
                    self.dispatch(plan, &updated, event).await;
                    return Ok(WebhookOutcome::Applied(plan));
                }
                None => debug!(rental_id = %rental.id, attempt, "rental changed underneath, re-deciding"),
            }
        }
        Err(AppError::Internal(format!(
            "event {} lost every compare-and-set attempt",
            event.event_id
        )))
    }

    async fn dispatch(&self, plan: Reconciliation, rental: &Rental, event: &PaymentEvent) {
        match plan {
            Reconciliation::Confirm => {
                self.notifier.notify(notify::rental_status_changed(rental)).await;
                self.notifier.notify(notify::rental_paid(rental)).await;
            }
            Reconciliation::RecordPayment => self.notifier.notify(notify::rental_paid(rental)).await,
            Reconciliation::MarkFailed => {
                let mut notice = notify::rental_status_changed(rental);
                if let Some(reason) = &event.failure_reason {
                    notice.message = format!("{} {reason}", notice.message);
                }
                self.notifier.notify(notice).await;
            }
            Reconciliation::Skip(_) => {}
        }
    }
}
