use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth::session::get_cookie_value;
use crate::console::SharedConsole;
use crate::error::AppError;
use crate::state::AppState;

/// The caller's console, found through its cookie.
/// Redirects to the login page if there is none.
#[derive(Clone)]
pub struct ConsoleHandle {
    pub id: String,
    pub console: SharedConsole,
}

impl FromRequestParts<AppState> for ConsoleHandle {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let id = get_cookie_value(parts, &state.config.console.cookie_name)
            .ok_or(AppError::Unauthorized)?
            .to_string();

        let console = state
            .consoles
            .lock()
            .await
            .get(&id)
            .ok_or(AppError::Unauthorized)?;

        Ok(ConsoleHandle { id, console })
    }
}

/// Optional console extractor. Never rejects.
pub struct MaybeConsole(pub Option<ConsoleHandle>);

impl FromRequestParts<AppState> for MaybeConsole {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match ConsoleHandle::from_request_parts(parts, state).await {
            Ok(handle) => Ok(MaybeConsole(Some(handle))),
            Err(_) => Ok(MaybeConsole(None)),
        }
    }
}
