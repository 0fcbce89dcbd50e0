use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde::Deserialize;

use crate::auth::gate::Route;
use crate::auth::session::{clear_console_cookie, console_cookie};
use crate::console::Console;
use crate::error::AppResult;
use crate::extractors::MaybeConsole;
use crate::routes::home::{Html, LoginTemplate};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

fn see_other(location: &str, cookie: String) -> Response {
    (
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, location.to_string()),
            (header::SET_COOKIE, cookie),
        ],
        "",
    )
        .into_response()
}

/// POST /auth/login: sign in with a fresh console. Admins go to the
/// dashboard, anyone else back to the login page. A rejected sign-in
/// re-renders the form with the provider's message.
pub async fn login(
    State(state): State<AppState>,
    existing: MaybeConsole,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let console = Console::new(state.connector.connect());

    let route = match console.gate.login(&form.email, &form.password).await {
        Ok(route) => route,
        Err(e) => {
            tracing::warn!(email = %form.email, "Login failed: {}", e);
            return Ok(Html(LoginTemplate {
                error: Some(e.user_message()),
                email: form.email,
            })
            .into_response());
        }
    };

    let id = {
        let mut consoles = state.consoles.lock().await;
        if let Some(previous) = existing.0 {
            consoles.remove(&previous.id);
        }
        consoles.insert(console)
    };
    tracing::info!(email = %form.email, landing = route.path(), "signed in");

    Ok(see_other(
        route.path(),
        console_cookie(&state.config.console.cookie_name, &id),
    ))
}

/// POST /auth/logout: sign out, drop the console, back to the login page.
pub async fn logout(State(state): State<AppState>, maybe_console: MaybeConsole) -> AppResult<Response> {
    let mut location = Route::Login.path().to_string();

    if let Some(handle) = maybe_console.0 {
        state.consoles.lock().await.remove(&handle.id);

        let console = handle.console.lock().await;
        if let Err(e) = console.gate.logout().await {
            tracing::warn!("Sign-out failed: {}", e);
            location = Route::Login.with_error(&e.user_message());
        }
    }

    Ok(see_other(
        &location,
        clear_console_cookie(&state.config.console.cookie_name),
    ))
}
