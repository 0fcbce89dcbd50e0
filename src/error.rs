use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};

use crate::auth::gate::Route;
use crate::dashboard::DashboardError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No console, or the console's session is not an admin's.
    #[error("Unauthorized")]
    Unauthorized,

    /// The provider could not confirm who is signed in.
    #[error("Session check failed: {0}")]
    SessionCheck(StoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Dashboard error: {0}")]
    Dashboard(#[from] DashboardError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // Browsers are sent back to the login page rather than shown a 401
            AppError::Unauthorized => return Redirect::to(Route::Login.path()).into_response(),
            AppError::SessionCheck(e) => {
                tracing::warn!("Session check failed: {}", e);
                let location = Route::Login.with_error(&e.user_message());
                return Redirect::to(&location).into_response();
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Dashboard(
                e @ (DashboardError::NotEditing
                | DashboardError::NothingStaged
                | DashboardError::UnknownPost(_)
                | DashboardError::NotDeletable(_)),
            ) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Dashboard(e) => {
                tracing::error!("Dashboard error: {}", e);
                (StatusCode::BAD_GATEWAY, "Backend request failed".to_string())
            }
        };

        (status, message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
