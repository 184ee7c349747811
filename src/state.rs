//! Explicitly constructed application services, handed to every handler as an extension.

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::service::clock::Clock;
use crate::service::notify::{Notifier, PushHub};
use crate::service::payments::{CheckoutOptions, PaymentService};
use crate::service::rentals::RentalService;
use crate::store::{NotificationStore, RentalStore};
use crate::stripe::checkout::CheckoutProvider;
use crate::stripe::signature::WebhookVerifier;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RentalStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub hub: PushHub,
    pub rentals: Arc<RentalService>,
    pub payments: Arc<PaymentService>,
    pub tokens: TokenVerifier,
    pub clock: Arc<dyn Clock>,
}

/// Adapters the services are built from.
pub struct Collaborators {
    pub store: Arc<dyn RentalStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub checkout: Arc<dyn CheckoutProvider>,
    pub clock: Arc<dyn Clock>,
    pub tokens: TokenVerifier,
    pub webhooks: WebhookVerifier,
    pub checkout_options: CheckoutOptions,
}

impl AppState {
    pub fn new(parts: Collaborators) -> Self {
        let hub = PushHub::new();
        let notifier = Notifier::new(parts.notifications.clone(), hub.clone());
        let rentals = RentalService::new(parts.store.clone(), notifier.clone(), parts.clock.clone());
        let payments = PaymentService::new(
            parts.store.clone(),
            notifier,
            parts.checkout,
            parts.webhooks,
            parts.clock.clone(),
            parts.checkout_options,
        );
        Self {
            store: parts.store,
            notifications: parts.notifications,
            hub,
            rentals: Arc::new(rentals),
            payments: Arc::new(payments),
            tokens: parts.tokens,
            clock: parts.clock,
        }
    }
}
