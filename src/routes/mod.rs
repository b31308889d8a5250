use crate::models::AppState;
use axum::Router;

pub mod auth_routes;
pub mod reminder_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1", reminder_routes::router())
        .with_state(state)
}
