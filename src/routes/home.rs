use askama::Template;
use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;

use crate::auth::gate::{landing, Route};
use crate::error::AppResult;
use crate::extractors::MaybeConsole;

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub error: Option<String>,
    pub email: String,
}

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

#[derive(Deserialize, Default)]
pub struct LoginQuery {
    pub error: Option<String>,
}

/// GET /: public login page. A signed-in admin goes straight to the dashboard.
/// A failed session check is shown on the page.
pub async fn index(maybe_console: MaybeConsole, Query(query): Query<LoginQuery>) -> AppResult<Response> {
    let mut error = query.error.filter(|e| !e.trim().is_empty());

    if let Some(handle) = maybe_console.0 {
        let console = handle.console.lock().await;
        match console.gate.resolve().await {
            Ok(session) if landing(session.as_ref()) == Route::Admin => {
                return Ok(Redirect::to(Route::Admin.path()).into_response());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Could not resolve session: {}", e);
                error.get_or_insert_with(|| e.user_message());
            }
        }
    }

    Ok(Html(LoginTemplate {
        error,
        email: String::new(),
    })
    .into_response())
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}
