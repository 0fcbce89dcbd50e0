use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use tokio::sync::OwnedMutexGuard;

use crate::auth::gate::{Access, Route};
use crate::console::{Console, Notice};
use crate::dashboard::format::{format_timestamp, numbered_lines, truncate};
use crate::dashboard::{DashboardError, DashboardState, DeleteKind, DeleteTarget, PostEdit};
use crate::error::{AppError, AppResult};
use crate::extractors::ConsoleHandle;
use crate::models::{Collection, RecordId};
use crate::routes::home::Html;
use crate::state::AppState;

// -- View models --

pub struct Tab {
    pub name: &'static str,
    pub title: &'static str,
    pub count: usize,
    pub active: bool,
}

pub struct PostRow {
    pub id: RecordId,
    pub image_url: String,
    pub summary: String,
    pub lines: Vec<String>,
    pub pet_name: String,
    pub display_name: String,
    pub anonymous: &'static str,
    pub created_at: String,
    pub editing: bool,
}

pub struct CommentRow {
    pub id: RecordId,
    pub post_id: RecordId,
    pub display_name: String,
    pub text: String,
    pub role: String,
    pub created_at: String,
}

pub struct LikeRow {
    pub id: RecordId,
    pub post_id: RecordId,
    pub user_id: String,
    pub created_at: String,
}

pub struct HistoryRow {
    pub id: RecordId,
    pub owner: String,
    pub owner_resolved: bool,
    pub image_url: String,
    pub summary: String,
    pub lines: Vec<String>,
    pub created_at: String,
}

#[derive(Template)]
#[template(path = "pages/dashboard.html")]
pub struct DashboardTemplate {
    pub email: String,
    pub view: &'static str,
    pub tabs: Vec<Tab>,
    pub posts: Vec<PostRow>,
    pub comments: Vec<CommentRow>,
    pub likes: Vec<LikeRow>,
    pub history: Vec<HistoryRow>,
    pub edit: Option<PostEdit>,
    pub pending_delete: Option<String>,
    pub notice: Option<Notice>,
}

impl DashboardTemplate {
    fn build(email: String, state: &DashboardState, notice: Option<Notice>, max_chars: usize) -> Self {
        let editing_id = state.editing().map(|e| e.id);

        let tabs = Collection::ALL
            .into_iter()
            .map(|c| Tab {
                name: c.name(),
                title: c.title(),
                count: state.row_count(c),
                active: c == state.active_view(),
            })
            .collect();

        let posts = state
            .posts()
            .iter()
            .map(|p| PostRow {
                id: p.id,
                image_url: p.image_url.clone().unwrap_or_default(),
                summary: truncate(p.analysis_result.as_deref(), max_chars),
                lines: numbered_lines(p.analysis_result.as_deref()),
                pet_name: p.pet_name.clone().unwrap_or_default(),
                display_name: p.display_name.clone().unwrap_or_default(),
                anonymous: if p.is_anonymous() { "Yes" } else { "No" },
                created_at: format_timestamp(&p.created_at),
                editing: editing_id == Some(p.id),
            })
            .collect();

        let comments = state
            .comments()
            .iter()
            .map(|c| CommentRow {
                id: c.id,
                post_id: c.post_id,
                display_name: c.display_name.clone().unwrap_or_default(),
                text: c.comment_text.clone().unwrap_or_default(),
                role: c.role.clone().unwrap_or_default(),
                created_at: format_timestamp(&c.created_at),
            })
            .collect();

        let likes = state
            .likes()
            .iter()
            .map(|l| LikeRow {
                id: l.id,
                post_id: l.post_id,
                user_id: l.user_id.to_string(),
                created_at: format_timestamp(&l.created_at),
            })
            .collect();

        let history = state
            .analysis_history()
            .iter()
            .map(|h| {
                let (owner, owner_resolved) = match &h.user_id {
                    None => ("Anonymous".to_string(), true),
                    Some(id) => match state.display_name(id) {
                        Some(name) => (name.to_string(), true),
                        None => (id.to_string(), false),
                    },
                };
                HistoryRow {
                    id: h.id,
                    owner,
                    owner_resolved,
                    image_url: h.image_url.clone().unwrap_or_default(),
                    summary: truncate(h.analysis_result.as_deref(), max_chars),
                    lines: numbered_lines(h.analysis_result.as_deref()),
                    created_at: format_timestamp(&h.created_at),
                }
            })
            .collect();

        Self {
            email,
            view: state.active_view().name(),
            tabs,
            posts,
            comments,
            likes,
            history,
            edit: state.editing().cloned(),
            pending_delete: state.pending_delete().map(|t| t.to_string()),
            notice,
        }
    }
}

// -- Request types --

#[derive(Deserialize, Default)]
pub struct ViewQuery {
    pub view: Option<String>,
}

#[derive(Deserialize)]
pub struct SavePostForm {
    pub pet_name: String,
    pub analysis_result: String,
}

#[derive(Deserialize)]
pub struct StageDeleteForm {
    pub kind: String,
    pub id: RecordId,
}

// -- Helpers --

/// Lock the caller's console and run the admin guard on it.
async fn admin_console(handle: ConsoleHandle) -> AppResult<OwnedMutexGuard<Console>> {
    let mut console = handle.console.lock_owned().await;
    match console.mount().await.map_err(AppError::SessionCheck)? {
        Access::Allow => Ok(console),
        Access::Redirect(_) => Err(AppError::Unauthorized),
    }
}

fn back_to_dashboard() -> Response {
    Redirect::to(Route::Admin.path()).into_response()
}

fn parse_view(raw: &str) -> AppResult<Collection> {
    raw.parse()
        .map_err(|e: crate::models::UnknownCollection| AppError::BadRequest(e.to_string()))
}

// -- Handlers --

/// GET /admin: the dashboard. `?view=` picks the table.
async fn dashboard(
    State(state): State<AppState>,
    handle: ConsoleHandle,
    Query(query): Query<ViewQuery>,
) -> AppResult<Response> {
    let mut console = admin_console(handle).await?;

    if let Some(raw) = query.view.as_deref() {
        console.dashboard.switch_view(parse_view(raw)?);
    }

    let email = console
        .gate
        .session()
        .and_then(|s| s.email)
        .unwrap_or_default();
    let notice = console.take_notice();
    let template = DashboardTemplate::build(
        email,
        console.dashboard.state(),
        notice,
        state.config.console.truncate_length,
    );
    Ok(Html(template).into_response())
}

/// POST /admin/view/{view}
async fn switch_view(handle: ConsoleHandle, Path(view): Path<String>) -> AppResult<Response> {
    let mut console = admin_console(handle).await?;
    console.dashboard.switch_view(parse_view(&view)?);
    Ok(back_to_dashboard())
}

/// POST /admin/refresh
async fn refresh(handle: ConsoleHandle) -> AppResult<Response> {
    let mut console = admin_console(handle).await?;
    let report = console.dashboard.refresh_all().await;
    if !report.is_complete() {
        let failed: Vec<&str> = report.failed.iter().map(|c| c.title()).collect();
        console.set_notice(Notice::error(format!(
            "Could not load: {}. Showing the last loaded rows.",
            failed.join(", ")
        )));
    }
    Ok(back_to_dashboard())
}

/// POST /admin/posts/{id}/edit
async fn edit_post(handle: ConsoleHandle, Path(id): Path<RecordId>) -> AppResult<Response> {
    let mut console = admin_console(handle).await?;
    console.dashboard.begin_edit(id)?;
    Ok(back_to_dashboard())
}

/// POST /admin/posts/save
async fn save_post(handle: ConsoleHandle, Form(form): Form<SavePostForm>) -> AppResult<Response> {
    let mut console = admin_console(handle).await?;
    console
        .dashboard
        .update_edit(form.pet_name, form.analysis_result)?;

    let notice = match console.dashboard.save_post().await {
        Ok(id) => Notice::info(format!("Post {} updated.", id)),
        Err(DashboardError::Store(e)) => Notice::error(format!(
            "Could not save post: {}. Your edits are still open.",
            e.user_message()
        )),
        Err(e) => return Err(e.into()),
    };
    console.set_notice(notice);
    Ok(back_to_dashboard())
}

/// POST /admin/posts/cancel
async fn cancel_edit(handle: ConsoleHandle) -> AppResult<Response> {
    let mut console = admin_console(handle).await?;
    console.dashboard.cancel_edit();
    Ok(back_to_dashboard())
}

/// POST /admin/delete: stage a post or comment for deletion
async fn stage_delete(
    handle: ConsoleHandle,
    Form(form): Form<StageDeleteForm>,
) -> AppResult<Response> {
    let kind: DeleteKind = form.kind.parse()?;
    let mut console = admin_console(handle).await?;
    console.dashboard.stage_delete(DeleteTarget { kind, id: form.id });
    Ok(back_to_dashboard())
}

/// POST /admin/delete/confirm
async fn confirm_delete(handle: ConsoleHandle) -> AppResult<Response> {
    let mut console = admin_console(handle).await?;

    let notice = match console.dashboard.confirm_delete().await {
        Ok(target) => Notice::info(format!("Deleted {}.", target)),
        Err(DashboardError::Store(e)) => {
            Notice::error(format!("Could not delete: {}", e.user_message()))
        }
        Err(e) => return Err(e.into()),
    };
    console.set_notice(notice);
    Ok(back_to_dashboard())
}

/// POST /admin/delete/cancel
async fn cancel_delete(handle: ConsoleHandle) -> AppResult<Response> {
    let mut console = admin_console(handle).await?;
    console.dashboard.cancel_delete();
    Ok(back_to_dashboard())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin", get(dashboard))
        .route("/admin/view/{view}", post(switch_view))
        .route("/admin/refresh", post(refresh))
        .route("/admin/posts/{id}/edit", post(edit_post))
        .route("/admin/posts/save", post(save_post))
        .route("/admin/posts/cancel", post(cancel_edit))
        .route("/admin/delete", post(stage_delete))
        .route("/admin/delete/confirm", post(confirm_delete))
        .route("/admin/delete/cancel", post(cancel_delete))
}
