use axum::{routing::get, Router};

use crate::state::AppState;

pub mod health;
pub mod listings;
pub mod users;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(listings::router())
        .merge(users::router())
}
