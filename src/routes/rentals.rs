use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    routing::{get, patch, post},
    Router,
};

use super::{json_body, parse_id, query_params, ApiResponse};
use crate::auth::Actor;
use crate::error::AppResult;
use crate::model::page::{Page, PageQuery, Paged};
use crate::model::rental::{CreateRentalRequest, Rental, StatusChangeRequest};
use crate::state::AppState;

pub fn rental_router() -> Router {
    Router::new()
        .route("/api/rentals", post(create_rental))
        .route("/api/rentals/:id", get(get_rental).delete(cancel_rental))
        .route("/api/rentals/:id/status", patch(update_rental_status))
        .route("/api/rentals/renter/:id", get(list_renter_rentals))
        .route("/api/rentals/owner/:id", get(list_owner_rentals))
}

async fn create_rental(
    Extension(state): Extension<AppState>,
    actor: Actor,
    payload: Result<Json<CreateRentalRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<Rental>>)> {
    let request = json_body(payload)?;
    let rental = state.rentals.create(&actor, request).await?;
    Ok(ApiResponse::created(rental))
}

async fn get_rental(
    Extension(state): Extension<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Rental>> {
    let id = parse_id(&id, "rental")?;
    Ok(ApiResponse::ok(state.rentals.get(&actor, id).await?))
}

async fn list_renter_rentals(
    Extension(state): Extension<AppState>,
    actor: Actor,
    Path(user_id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Paged<Rental>>> {
    let user_id = parse_id(&user_id, "user")?;
    let page = Page::from(&query_params(query)?);
    Ok(ApiResponse::ok(state.rentals.list_for_renter(&actor, user_id, page).await?))
}

async fn list_owner_rentals(
    Extension(state): Extension<AppState>,
    actor: Actor,
    Path(owner_id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Paged<Rental>>> {
    let owner_id = parse_id(&owner_id, "owner")?;
    let page = Page::from(&query_params(query)?);
    Ok(ApiResponse::ok(state.rentals.list_for_owner(&actor, owner_id, page).await?))
}

async fn update_rental_status(
    Extension(state): Extension<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    payload: Result<Json<StatusChangeRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Rental>> {
    let id = parse_id(&id, "rental")?;
    let request = json_body(payload)?;
    Ok(ApiResponse::ok(state.rentals.update_status(&actor, id, request).await?))
}

async fn cancel_rental(
    Extension(state): Extension<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Rental>> {
    let id = parse_id(&id, "rental")?;
    Ok(ApiResponse::ok(state.rentals.cancel(&actor, id).await?))
}
