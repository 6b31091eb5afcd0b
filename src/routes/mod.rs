pub mod auth;
pub mod trips;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/auth", auth::router())
        .nest("/api/trips", trips::router())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}
