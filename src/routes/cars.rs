use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    routing::get,
    Router,
};
use chrono::{Datelike, Utc};
use tracing::info;

use super::{json_body, parse_id, query_params, ApiResponse};
use crate::auth::Actor;
use crate::error::{AppError, AppResult};
use crate::model::car::{
    AvailabilityQuery, AvailabilityResponse, Car, CarQuery, CreateCarRequest, UpdateCarRequest,
};
use crate::model::page::{Page, PageQuery, Paged};
use crate::state::AppState;

const OLDEST_MODEL_YEAR: i32 = 1900;

pub fn car_router() -> Router {
    Router::new()
        .route("/api/cars", get(list_cars).post(create_car))
        .route("/api/cars/:id", get(get_car).patch(update_car))
        .route("/api/cars/:id/availability", get(car_availability))
}

fn validate_text(value: &str, field: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn validate_year(year: i32) -> AppResult<()> {
    let newest = Utc::now().year() + 1;
    if !(OLDEST_MODEL_YEAR..=newest).contains(&year) {
        return Err(AppError::Validation(format!(
            "year must be between {OLDEST_MODEL_YEAR} and {newest}"
        )));
    }
    Ok(())
}

fn validate_rate(daily_rate: i64) -> AppResult<()> {
    if daily_rate <= 0 {
        return Err(AppError::Validation("dailyRate must be greater than zero".into()));
    }
    Ok(())
}

async fn list_cars(
    Extension(state): Extension<AppState>,
    query: Result<Query<CarQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Paged<Car>>> {
    let query = query_params(query)?;
    let page = Page::from(&PageQuery {
        page: query.page,
        limit: query.limit,
    });
    let (cars, total) = state.store.list_cars(&query, page).await?;
    Ok(ApiResponse::ok(Paged::new(cars, total, page)))
}

async fn get_car(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Car>> {
    let id = parse_id(&id, "car")?;
    let car = state
        .store
        .find_car(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Car not found".into()))?;
    Ok(ApiResponse::ok(car))
}

async fn create_car(
    Extension(state): Extension<AppState>,
    actor: Actor,
    payload: Result<Json<CreateCarRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<Car>>)> {
    let request = json_body(payload)?;
    validate_text(&request.make, "make")?;
    validate_text(&request.model, "model")?;
    validate_year(request.year)?;
    validate_rate(request.daily_rate)?;

    let car = state.store.insert_car(actor.id, &request).await?;
    info!(car_id = %car.id, owner_id = %actor.id, "car listed");
    Ok(ApiResponse::created(car))
}

/// Owner or admin. Rate changes only price future bookings.
async fn update_car(
    Extension(state): Extension<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    payload: Result<Json<UpdateCarRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Car>> {
    let id = parse_id(&id, "car")?;
    let request = json_body(payload)?;
    if request.is_empty() {
        return Err(AppError::Validation("no fields to update".into()));
    }
    if let Some(make) = &request.make {
        validate_text(make, "make")?;
    }
    if let Some(model) = &request.model {
        validate_text(model, "model")?;
    }
    if let Some(year) = request.year {
        validate_year(year)?;
    }
    if let Some(daily_rate) = request.daily_rate {
        validate_rate(daily_rate)?;
    }

    let car = state
        .store
        .find_car(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Car not found".into()))?;
    if car.owner_id != actor.id && !actor.is_admin() {
        return Err(AppError::Forbidden("only the owner or an admin can edit this car".into()));
    }

    let updated = state
        .store
        .update_car(id, &request)
        .await?
        .ok_or_else(|| AppError::NotFound("Car not found".into()))?;
    info!(car_id = %id, actor_id = %actor.id, "car updated");
    Ok(ApiResponse::ok(updated))
}

async fn car_availability(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> AppResult<ApiResponse<AvailabilityResponse>> {
    let car_id = parse_id(&id, "car")?;
    let query = query_params(query)?;
    let availability = state
        .rentals
        .check_availability(car_id, query.start_date.as_deref(), query.end_date.as_deref())
        .await?;
    Ok(ApiResponse::ok(availability))
}
