//! Best-effort notification dispatch: persist a notification row, then push it to the
//! user's live subscribers. Failures are logged and never reach the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::notification::NewNotification;
use crate::model::rental::{Rental, RentalStatus};
use crate::store::NotificationStore;

const CHANNEL_CAPACITY: usize = 32;

/// Message delivered to a user's live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub event: String,
    pub payload: serde_json::Value,
}

/// Per-user broadcast rooms.
#[derive(Debug, Clone, Default)]
pub struct PushHub {
    rooms: Arc<Mutex<HashMap<Uuid, broadcast::Sender<PushMessage>>>>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also drops rooms whose subscribers have all gone away.
    pub fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<PushMessage> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms.retain(|_, sender| sender.receiver_count() > 0);
        rooms
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Sends to every live subscriber of `user_id`. Returns how many received it.
    #[cfg(test)]
    fn room_count(&self) -> usize {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn emit_to_user(&self, user_id: Uuid, event: &str, payload: serde_json::Value) -> usize {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = rooms.get(&user_id) else {
            return 0;
        };
        let message = PushMessage {
            event: event.to_owned(),
            payload,
        };
        match sender.send(message) {
            Ok(delivered) => delivered,
            Err(_) => {
                // every receiver is gone
                rooms.remove(&user_id);
                0
            }
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn NotificationStore>,
    hub: PushHub,
}

impl Notifier {
    pub fn new(store: Arc<dyn NotificationStore>, hub: PushHub) -> Self {
        Self { store, hub }
    }

    /// Never fails: a notification outage must not undo a committed booking change.
    pub async fn notify(&self, notification: NewNotification) {
        let user_id = notification.user_id;
        match self.store.insert_notification(&notification).await {
            Ok(saved) => {
                let payload = serde_json::to_value(&saved).unwrap_or_else(|_| json!({}));
                let delivered = self.hub.emit_to_user(user_id, "notification", payload);
                debug!(%user_id, kind = %saved.kind, delivered, "notification dispatched");
            }
            Err(err) => {
                warn!(%user_id, kind = %notification.kind, error = %err, "notification dispatch failed");
            }
        }
    }
}

/// Owner-facing "new rental request".
pub fn rental_requested(rental: &Rental) -> NewNotification {
    NewNotification {
        user_id: rental.owner_id,
        title: "New rental request".to_owned(),
        message: format!(
            "Your car has been requested from {} to {}.",
            rental.start_date, rental.end_date
        ),
        kind: "rental_request".to_owned(),
        data: json!({ "rentalId": rental.id, "carId": rental.car_id }),
    }
}

/// Renter-facing status update.
pub fn rental_status_changed(rental: &Rental) -> NewNotification {
    let message = match rental.status {
        RentalStatus::Confirmed => "Your rental has been confirmed.".to_owned(),
        RentalStatus::Rejected => match rental.rejection_reason.as_deref() {
            Some(reason) => format!("Your rental request was rejected: {reason}"),
            None => "Your rental request was rejected.".to_owned(),
        },
        RentalStatus::Cancelled => "Your rental has been cancelled.".to_owned(),
        RentalStatus::Completed => "Your rental has been completed. Thanks for driving with us.".to_owned(),
        RentalStatus::PaymentFailed => "Your payment failed, so the rental was not confirmed.".to_owned(),
        RentalStatus::Pending => "Your rental is pending.".to_owned(),
    };
    NewNotification {
        user_id: rental.user_id,
        title: "Rental status updated".to_owned(),
        message,
        kind: "rental_status".to_owned(),
        data: json!({
            "rentalId": rental.id,
            "status": rental.status,
            "paymentStatus": rental.payment_status,
        }),
    }
}

/// Owner-facing "payment received".
pub fn rental_paid(rental: &Rental) -> NewNotification {
    NewNotification {
        user_id: rental.owner_id,
        title: "Rental paid".to_owned(),
        message: format!("Payment of {} received for a rental of your car.", rental.total_cost),
        kind: "payment".to_owned(),
        data: json!({ "rentalId": rental.id, "amount": rental.total_cost }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::notification::Notification;
    use crate::model::rental::PaymentStatus;
    use crate::store::{MockNotificationStore, StoreError};

    fn draft(user_id: Uuid) -> NewNotification {
        NewNotification {
            user_id,
            title: "t".to_owned(),
            message: "m".to_owned(),
            kind: "rental_status".to_owned(),
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let mut store = MockNotificationStore::new();
        store
            .expect_insert_notification()
            .times(1)
            .returning(|_| Err(StoreError::Database(sqlx::Error::PoolTimedOut)));
        let hub = PushHub::new();
        let user_id = Uuid::new_v4();
        let mut rx = hub.subscribe(user_id);

        Notifier::new(Arc::new(store), hub).notify(draft(user_id)).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn saved_notification_is_pushed_to_subscriber() {
        let user_id = Uuid::new_v4();
        let mut store = MockNotificationStore::new();
        store.expect_insert_notification().times(1).returning(|n| {
            Ok(Notification {
                id: Uuid::new_v4(),
                user_id: n.user_id,
                title: n.title.clone(),
                message: n.message.clone(),
                kind: n.kind.clone(),
                data: n.data.clone(),
                is_read: false,
                created_at: Utc::now(),
            })
        });
        let hub = PushHub::new();
        let mut rx = hub.subscribe(user_id);

        Notifier::new(Arc::new(store), hub).notify(draft(user_id)).await;

        let message = rx.try_recv().expect("pushed");
        assert_eq!(message.event, "notification");
        assert_eq!(message.payload["type"], "rental_status");
    }

    #[test]
    fn emit_without_subscribers_reaches_nobody() {
        let hub = PushHub::new();
        assert_eq!(hub.emit_to_user(Uuid::new_v4(), "x", json!(null)), 0);
    }

    #[test]
    fn dropped_receivers_close_the_room() {
        let hub = PushHub::new();
        let user_id = Uuid::new_v4();
        drop(hub.subscribe(user_id));
        assert_eq!(hub.emit_to_user(user_id, "x", json!(null)), 0);
        let _rx = hub.subscribe(user_id);
        assert_eq!(hub.emit_to_user(user_id, "x", json!(null)), 1);
    }

    #[test]
    fn abandoned_rooms_are_swept_on_next_subscribe() {
        let hub = PushHub::new();
        drop(hub.subscribe(Uuid::new_v4()));
        drop(hub.subscribe(Uuid::new_v4()));
        let _live = hub.subscribe(Uuid::new_v4());
        assert_eq!(hub.room_count(), 1);
    }

    #[test]
    fn completed_notice_talks_about_driving() {
        let now = Utc::now();
        let rental = Rental {
            id: Uuid::new_v4(),
            car_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            start_date: now.date_naive(),
            end_date: now.date_naive() + chrono::Duration::days(2),
            total_days: 2,
            daily_rate: 50,
            total_cost: 100,
            status: RentalStatus::Completed,
            payment_status: PaymentStatus::Paid,
            payment_method: "card".to_owned(),
            payment_reference: Some("pi_1".to_owned()),
            pickup_location: "Depot".to_owned(),
            dropoff_location: "Depot".to_owned(),
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        let notice = rental_status_changed(&rental);
        assert_eq!(notice.user_id, rental.user_id);
        assert!(notice.message.contains("driving"));
    }
}
