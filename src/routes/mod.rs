pub mod admin;
pub mod assets;
pub mod home;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::handlers;
use crate::state::AppState;

/// The full application router: login page, auth actions, the admin dashboard.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home::index))
        .route("/health", get(home::health))
        .route("/assets/{*path}", get(assets::serve))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .merge(admin::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
