use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::rental::PaymentStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub rental_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub payment_reference: String,
    pub payment_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Payment row to insert alongside a rental change.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub rental_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub payment_reference: String,
    pub payment_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventKind {
    CheckoutCompleted,
    PaymentSucceeded,
    PaymentFailed,
}

impl PaymentEventKind {
    pub fn is_success(self) -> bool {
        !matches!(self, PaymentEventKind::PaymentFailed)
    }
}

/// Provider callback after signature verification and schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    /// Provider event id, for logs.
    pub event_id: String,
    pub kind: PaymentEventKind,
    /// Provider id of the payment. Shared by every event of the same payment.
    pub reference: String,
    pub rental_id: Option<Uuid>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    pub rental_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}
