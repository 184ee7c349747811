//! Webhook payload decoding.
//!
//! Bodies are parsed in two steps: the envelope first, then `data.object` against the shape
//! the event type implies. Only the three event types reconciliation cares about produce a
//! [`PaymentEvent`]; anything else decodes to `None` and is acknowledged untouched.

use std::collections::HashMap;

use serde::Deserialize;
use uuid::Uuid;

use crate::model::payment::{PaymentEvent, PaymentEventKind};

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";

/// Metadata key carrying the rental id on sessions and intents we create.
pub const RENTAL_ID_METADATA: &str = "rentalId";

#[derive(Debug, thiserror::Error)]
#[error("invalid webhook payload: {0}")]
pub struct EventError(#[from] serde_json::Error);

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

/// Stripe fields that may arrive as a bare id or as the expanded object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    fn into_id(self) -> String {
        match self {
            Expandable::Id(id) | Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    payment_status: String,
    #[serde(default)]
    payment_intent: Option<Expandable>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    last_payment_error: Option<PaymentError>,
}

#[derive(Debug, Deserialize)]
struct PaymentError {
    #[serde(default)]
    message: Option<String>,
}

fn rental_id_from(metadata: &HashMap<String, String>, fallback: Option<&str>) -> Option<Uuid> {
    metadata
        .get(RENTAL_ID_METADATA)
        .map(String::as_str)
        .into_iter()
        .chain(fallback)
        .find_map(|raw| Uuid::parse_str(raw.trim()).ok())
}

/// Decodes a verified webhook body.
pub fn parse_event(body: &[u8]) -> Result<Option<PaymentEvent>, EventError> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let event = match envelope.kind.as_str() {
        CHECKOUT_SESSION_COMPLETED => {
            let session: CheckoutSessionObject = serde_json::from_value(envelope.data.object)?;
            // Delayed-notification methods complete the session before money moves.
            if session.payment_status != "paid" {
                return Ok(None);
            }
            PaymentEvent {
                event_id: envelope.id,
                kind: PaymentEventKind::CheckoutCompleted,
                rental_id: rental_id_from(&session.metadata, session.client_reference_id.as_deref()),
                reference: session
                    .payment_intent
                    .map(Expandable::into_id)
                    .unwrap_or(session.id),
                amount: session.amount_total,
                currency: session.currency,
                failure_reason: None,
            }
        }
        PAYMENT_INTENT_SUCCEEDED | PAYMENT_INTENT_FAILED => {
            let intent: PaymentIntentObject = serde_json::from_value(envelope.data.object)?;
            let succeeded = envelope.kind == PAYMENT_INTENT_SUCCEEDED;
            PaymentEvent {
                event_id: envelope.id,
                kind: if succeeded {
                    PaymentEventKind::PaymentSucceeded
                } else {
                    PaymentEventKind::PaymentFailed
                },
                rental_id: rental_id_from(&intent.metadata, None),
                reference: intent.id,
                amount: Some(intent.amount),
                currency: Some(intent.currency),
                failure_reason: intent.last_payment_error.and_then(|err| err.message),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}
