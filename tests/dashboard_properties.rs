/// Behavioural properties of the session guard and the dashboard controller,
/// checked against the in-memory store's call journal.
use pawscan_admin::auth::{guard, Access, Route};
use pawscan_admin::dashboard::format::numbered_lines;
use pawscan_admin::dashboard::{Dashboard, DeleteKind, DeleteTarget};
use pawscan_admin::models::{Collection, Comment, Post, RecordId, Role, Session, UserId};
use pawscan_admin::store::{MemoryBackend, StoreCall, StoreConnector};
use serde_json::{json, Value};

fn post_row(id: i64, pet_name: &str) -> Value {
    json!({
        "id": id,
        "image_url": format!("https://cdn.pawscan.test/posts/{id}.jpg"),
        "analysis_result": "1. Breed: Beagle",
        "pet_name": pet_name,
        "display_name": "Maya",
        "is_anonymous": false,
        "created_at": "2024-06-01T12:00:00Z"
    })
}

fn comment_row(id: i64, post_id: i64) -> Value {
    json!({
        "id": id,
        "post_id": post_id,
        "display_name": "Leo",
        "comment_text": format!("comment {id}"),
        "role": "user",
        "created_at": "2024-06-01T12:30:00Z"
    })
}

fn history_row(id: i64, user_id: Option<&str>) -> Value {
    json!({
        "id": id,
        "user_id": user_id,
        "image_url": null,
        "analysis_result": "1. ok",
        "created_at": "2024-06-02T08:00:00Z"
    })
}

async fn mounted_dashboard(backend: &MemoryBackend) -> Dashboard {
    let mut dashboard = Dashboard::new(backend.connect());
    assert!(dashboard.refresh_all().await.is_complete());
    backend.clear_calls();
    dashboard
}

fn decoded<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).unwrap())
        .collect()
}

#[test]
fn test_guard_redirects_every_non_admin() {
    let session = |role| Session {
        user_id: UserId::new("u"),
        email: None,
        access_token: "token".to_string(),
        role,
    };

    assert_eq!(guard(None), Access::Redirect(Route::Login));
    assert_eq!(
        guard(Some(&session(Role::Member))),
        Access::Redirect(Route::Login)
    );
    assert_eq!(guard(Some(&session(Role::Admin))), Access::Allow);
}

#[tokio::test]
async fn test_refresh_mirrors_remote_exactly() {
    let backend = MemoryBackend::seeded();
    let mut dashboard = mounted_dashboard(&backend).await;

    let posts = vec![post_row(10, "Rex"), post_row(11, "Nala"), post_row(12, "Pip")];
    let comments = vec![comment_row(5, 10)];
    backend.set_rows(Collection::Posts, posts.clone());
    backend.set_rows(Collection::Comments, comments.clone());

    assert!(dashboard.refresh_all().await.is_complete());
    assert_eq!(dashboard.state().posts(), decoded::<Post>(posts).as_slice());
    assert_eq!(
        dashboard.state().comments(),
        decoded::<Comment>(comments).as_slice()
    );

    // Rows removed remotely disappear locally; nothing is merged
    backend.set_rows(Collection::Posts, vec![post_row(12, "Pip")]);
    dashboard.refresh(Collection::Posts).await.unwrap();
    assert_eq!(dashboard.state().posts().len(), 1);
    assert_eq!(dashboard.state().posts()[0].id, RecordId(12));
}

#[tokio::test]
async fn test_cancelled_edit_leaves_remote_untouched() {
    let backend = MemoryBackend::seeded();
    let before = backend.rows(Collection::Posts);
    let mut dashboard = mounted_dashboard(&backend).await;

    dashboard.begin_edit(RecordId(1)).unwrap();
    dashboard
        .update_edit("Changed".to_string(), "changed".to_string())
        .unwrap();
    let cancelled = dashboard.cancel_edit().unwrap();

    assert_eq!(cancelled.id, RecordId(1));
    assert!(dashboard.state().editing().is_none());
    assert_eq!(backend.rows(Collection::Posts), before);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_save_sends_one_update_then_one_refetch() {
    let backend = MemoryBackend::seeded();
    backend.set_rows(Collection::Posts, vec![post_row(7, "Old")]);
    let mut dashboard = mounted_dashboard(&backend).await;

    dashboard.begin_edit(RecordId(7)).unwrap();
    dashboard
        .update_edit("Rex".to_string(), "1. ok\n2. fine".to_string())
        .unwrap();
    let saved = dashboard.save_post().await.unwrap();

    assert_eq!(saved, RecordId(7));
    assert_eq!(
        backend.calls(),
        vec![
            StoreCall::UpdateById {
                collection: Collection::Posts,
                id: RecordId(7),
                fields: json!({ "pet_name": "Rex", "analysis_result": "1. ok\n2. fine" }),
            },
            StoreCall::ListAll(Collection::Posts),
        ]
    );
    assert!(dashboard.state().editing().is_none());
    assert_eq!(
        dashboard.state().posts()[0].pet_name.as_deref(),
        Some("Rex")
    );
}

#[tokio::test]
async fn test_delete_only_after_confirmation() {
    let backend = MemoryBackend::seeded();
    backend.set_rows(
        Collection::Comments,
        vec![comment_row(3, 1), comment_row(4, 1)],
    );
    let mut dashboard = mounted_dashboard(&backend).await;
    let target = DeleteTarget {
        kind: DeleteKind::Comment,
        id: RecordId(3),
    };

    dashboard.stage_delete(target);
    assert_eq!(dashboard.cancel_delete(), Some(target));
    assert!(backend.calls().is_empty());

    dashboard.stage_delete(target);
    let deleted = dashboard.confirm_delete().await.unwrap();

    assert_eq!(deleted, target);
    assert_eq!(
        backend.calls(),
        vec![
            StoreCall::DeleteById {
                collection: Collection::Comments,
                id: RecordId(3),
            },
            StoreCall::ListAll(Collection::Comments),
        ]
    );
    assert!(dashboard.state().pending_delete().is_none());
    assert_eq!(dashboard.state().comments().len(), 1);
    assert_eq!(dashboard.state().comments()[0].id, RecordId(4));
}

#[test]
fn test_numbered_lines_renumber_cleanly() {
    assert_eq!(numbered_lines(Some("1. a\n2. b\n\n3. c")), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_one_name_lookup_for_distinct_owners() {
    let backend = MemoryBackend::seeded();
    backend.set_rows(
        Collection::AnalysisHistory,
        vec![
            history_row(1, Some("user-1")),
            history_row(2, Some("user-2")),
            history_row(3, None),
            history_row(4, Some("user-1")),
        ],
    );
    let mut dashboard = Dashboard::new(backend.connect());
    dashboard.refresh(Collection::AnalysisHistory).await.unwrap();

    let lookups: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, StoreCall::ResolveDisplayNames(_)))
        .collect();
    assert_eq!(
        lookups,
        vec![StoreCall::ResolveDisplayNames(
            [UserId::new("user-1"), UserId::new("user-2")]
                .into_iter()
                .collect()
        )]
    );

    let state = dashboard.state();
    assert_eq!(state.display_name(&UserId::new("user-1")), Some("Maya"));
    assert_eq!(state.display_name(&UserId::new("user-2")), Some("Leo"));
    assert!(state.analysis_history()[2].user_id.is_none());
}
