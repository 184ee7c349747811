//! Hosted Checkout session creation over Stripe's form-encoded REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use super::event::RENTAL_ID_METADATA;
use crate::model::payment::CheckoutSession;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("stripe request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("stripe rejected the session ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("unexpected stripe response: {0}")]
    Decode(String),
}

/// What the hosted page should charge for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub rental_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, CheckoutError>;
}

pub struct StripeCheckout {
    client: Client,
    endpoint: String,
    secret_key: String,
}

impl StripeCheckout {
    pub fn new(api_base: &str, secret_key: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/checkout/sessions", api_base.trim_end_matches('/')),
            secret_key: secret_key.into(),
        })
    }
}

/// Form fields for one line item, with the rental id stamped on both the session and its
/// payment intent so every later webhook can find the rental.
fn session_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let rental_id = request.rental_id.to_string();
    vec![
        ("mode".into(), "payment".into()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("client_reference_id".into(), rental_id.clone()),
        ("payment_method_types[0]".into(), "card".into()),
        ("line_items[0][quantity]".into(), "1".into()),
        ("line_items[0][price_data][currency]".into(), request.currency.clone()),
        ("line_items[0][price_data][unit_amount]".into(), request.amount.to_string()),
        (
            "line_items[0][price_data][product_data][name]".into(),
            request.description.clone(),
        ),
        (format!("metadata[{RENTAL_ID_METADATA}]"), rental_id.clone()),
        (format!("payment_intent_data[metadata][{RENTAL_ID_METADATA}]"), rental_id),
    ]
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn map_status_error(status: StatusCode, body: &[u8]) -> CheckoutError {
    let message = serde_json::from_slice::<ErrorResponse>(body)
        .ok()
        .and_then(|parsed| parsed.error.message)
        .unwrap_or_else(|| String::from_utf8_lossy(body).chars().take(200).collect());
    CheckoutError::Rejected { status, message }
}

fn parse_session(body: &[u8]) -> Result<CheckoutSession, CheckoutError> {
    let session: SessionResponse =
        serde_json::from_slice(body).map_err(|err| CheckoutError::Decode(err.to_string()))?;
    let url = session
        .url
        .ok_or_else(|| CheckoutError::Decode("session has no redirect url".into()))?;
    Ok(CheckoutSession {
        session_id: session.id,
        url,
    })
}

#[async_trait]
impl CheckoutProvider for StripeCheckout {
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, CheckoutError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.secret_key)
            .form(&session_form(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        parse_session(body.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            rental_id: Uuid::nil(),
            amount: 10000,
            currency: "usd".into(),
            description: "Toyota Corolla, 2024-06-01 to 2024-06-03".into(),
            success_url: "http://localhost:5173/payment/success".into(),
            cancel_url: "http://localhost:5173/payment/cancel".into(),
        }
    }

    fn field<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn form_charges_total_once_and_tags_rental() {
        let form = session_form(&request());
        let rental_id = Uuid::nil().to_string();
        assert_eq!(field(&form, "line_items[0][price_data][unit_amount]"), Some("10000"));
        assert_eq!(field(&form, "line_items[0][quantity]"), Some("1"));
        assert_eq!(field(&form, "metadata[rentalId]"), Some(rental_id.as_str()));
        assert_eq!(
            field(&form, "payment_intent_data[metadata][rentalId]"),
            Some(rental_id.as_str())
        );
        assert_eq!(field(&form, "client_reference_id"), Some(rental_id.as_str()));
    }

    #[test]
    fn stripe_error_message_is_surfaced() {
        let err = map_status_error(
            StatusCode::BAD_REQUEST,
            br#"{"error":{"message":"Invalid currency: zzz","type":"invalid_request_error"}}"#,
        );
        assert!(matches!(err, CheckoutError::Rejected { ref message, .. } if message == "Invalid currency: zzz"));
    }

    #[test]
    fn session_without_url_is_a_decode_error() {
        assert!(matches!(
            parse_session(br#"{"id":"cs_test_1","url":null}"#),
            Err(CheckoutError::Decode(_))
        ));
        let session = parse_session(br#"{"id":"cs_test_1","url":"https://checkout.stripe.com/c/pay/cs_test_1"}"#)
            .expect("valid");
        assert_eq!(session.session_id, "cs_test_1");
    }
}
