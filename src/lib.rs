//! Car-rental booking backend: availability, rental lifecycle, Stripe payment
//! reconciliation and user notifications behind an axum JSON API.

use std::path::Path;

use axum::{extract::Extension, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod error;
pub mod model;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod stripe;

use state::AppState;

/// The full HTTP application. With `static_dir`, unknown paths serve the client bundle.
pub fn app(state: AppState, static_dir: Option<&Path>) -> Router {
    let mut router = routes::api_router();
    if let Some(dir) = static_dir {
        let serve_dir = ServeDir::new(dir).not_found_service(ServeFile::new(dir.join("index.html")));
        router = router.fallback_service(serve_dir);
    }
    router
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
