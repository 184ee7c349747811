use axum::{
    body::Bytes,
    extract::rejection::JsonRejection,
    extract::{Extension, Json, Path},
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use serde_json::json;
use tracing::debug;

use super::{json_body, parse_id, ApiResponse};
use crate::auth::Actor;
use crate::error::AppResult;
use crate::model::payment::{CheckoutSession, CheckoutSessionRequest, Payment};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn payment_router() -> Router {
    Router::new()
        .route("/api/payments/webhook", post(stripe_webhook))
        .route("/api/payments/create-checkout-session", post(create_checkout_session))
        .route("/api/payments/rental/:id", get(list_rental_payments))
}

/// Raw body: the signature covers the exact bytes Stripe sent.
async fn stripe_webhook(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    let outcome = state.payments.handle_webhook(signature, &body).await?;
    debug!(?outcome, "webhook handled");
    Ok(Json(json!({ "received": true })))
}

async fn create_checkout_session(
    Extension(state): Extension<AppState>,
    actor: Actor,
    payload: Result<Json<CheckoutSessionRequest>, JsonRejection>,
) -> AppResult<ApiResponse<CheckoutSession>> {
    let request = json_body(payload)?;
    let session = state.payments.create_checkout_session(&actor, request).await?;
    Ok(ApiResponse::ok(session))
}

async fn list_rental_payments(
    Extension(state): Extension<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<Payment>>> {
    let rental_id = parse_id(&id, "rental")?;
    Ok(ApiResponse::ok(state.rentals.payments_for(&actor, rental_id).await?))
}
