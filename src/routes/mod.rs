use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Json, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub mod cars;
pub mod notifications;
pub mod payments;
pub mod rentals;

/// Every `/api` route.
pub fn api_router() -> Router {
    Router::new()
        .merge(cars::car_router())
        .merge(rentals::rental_router())
        .merge(payments::payment_router())
        .merge(notifications::notification_router())
        .route("/api/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `{ "success": true, "data": ... }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }

    pub fn created(data: T) -> (StatusCode, Json<Self>) {
        (StatusCode::CREATED, Json(Self::ok(data)))
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Path ids arrive as text so a bad one renders as a 400 in the usual error shape.
pub(crate) fn parse_id(raw: &str, what: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::Validation(format!("invalid {what} id")))
}

pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_ids_are_validation_errors() {
        assert!(matches!(parse_id("12", "rental"), Err(AppError::Validation(ref m)) if m == "invalid rental id"));
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "rental").expect("valid"), id);
    }

    #[test]
    fn envelope_shape() {
        let value = serde_json::to_value(ApiResponse::ok(json!({ "a": 1 }))).expect("json");
        assert_eq!(value, json!({ "success": true, "data": { "a": 1 } }));
    }
}
