pub mod format;
pub mod state;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::models::{AnalysisRecord, Collection, Comment, Like, Post, RecordId};
use crate::store::{DynRemoteStore, StoreError};

pub use state::{DashboardState, DeleteKind, DeleteTarget, PostEdit};

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("No post is being edited")]
    NotEditing,

    #[error("Nothing is waiting for delete confirmation")]
    NothingStaged,

    #[error("Post {0} is not loaded")]
    UnknownPost(RecordId),

    #[error("{0} cannot be deleted from the console")]
    NotDeletable(String),

    #[error("Could not read {collection}: {source}")]
    Decode {
        collection: Collection,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a bulk refresh. Collections that failed kept their old rows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub failed: Vec<Collection>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

fn decode<T: DeserializeOwned>(
    collection: Collection,
    rows: Vec<Value>,
) -> Result<Vec<T>, DashboardError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| DashboardError::Decode { collection, source })
}

/// Dashboard view-state controller. Owns the mirrored collections and the
/// edit/delete slots; every mutation is followed by a re-fetch of the
/// collection it touched.
pub struct Dashboard {
    store: DynRemoteStore,
    state: DashboardState,
}

impl Dashboard {
    pub fn new(store: DynRemoteStore) -> Self {
        Self {
            store,
            state: DashboardState::default(),
        }
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    /// Fetch all four collections concurrently. A failed fetch is logged and
    /// leaves that collection as it was.
    pub async fn refresh_all(&mut self) -> RefreshReport {
        let store = self.store.clone();
        let (posts, comments, likes, history) = tokio::join!(
            store.list_all(Collection::Posts),
            store.list_all(Collection::Comments),
            store.list_all(Collection::Likes),
            store.list_all(Collection::AnalysisHistory),
        );

        let mut report = RefreshReport::default();
        for (collection, fetched) in [
            (Collection::Posts, posts),
            (Collection::Comments, comments),
            (Collection::Likes, likes),
            (Collection::AnalysisHistory, history),
        ] {
            if self.apply(collection, fetched).await.is_err() {
                report.failed.push(collection);
            }
        }
        report
    }

    /// Re-fetch one collection.
    pub async fn refresh(&mut self, collection: Collection) -> Result<(), DashboardError> {
        let fetched = self.store.list_all(collection).await;
        self.apply(collection, fetched).await
    }

    async fn apply(
        &mut self,
        collection: Collection,
        fetched: Result<Vec<Value>, StoreError>,
    ) -> Result<(), DashboardError> {
        let result = match fetched {
            Ok(rows) => self.replace(collection, rows),
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(()) => {
                tracing::debug!(%collection, rows = self.state.row_count(collection), "fetched");
                if collection == Collection::AnalysisHistory {
                    self.resolve_display_names().await;
                }
            }
            Err(e) => tracing::error!(%collection, "Error fetching {}: {}", collection, e),
        }
        result
    }

    fn replace(&mut self, collection: Collection, rows: Vec<Value>) -> Result<(), DashboardError> {
        match collection {
            Collection::Posts => self.state.replace_posts(decode::<Post>(collection, rows)?),
            Collection::Comments => self
                .state
                .replace_comments(decode::<Comment>(collection, rows)?),
            Collection::Likes => self.state.replace_likes(decode::<Like>(collection, rows)?),
            Collection::AnalysisHistory => self
                .state
                .replace_analysis_history(decode::<AnalysisRecord>(collection, rows)?),
        }
        Ok(())
    }

    /// One batch lookup for every owner in analysis history. Failures leave
    /// those owners unresolved.
    async fn resolve_display_names(&mut self) {
        let owners = self.state.history_owners();
        if owners.is_empty() {
            return;
        }

        match self.store.resolve_display_names(&owners).await {
            Ok(names) => self.state.merge_display_names(names),
            Err(e) => tracing::error!("Error fetching user display names: {}", e),
        }
    }

    /// Local only; nothing is fetched.
    pub fn switch_view(&mut self, view: Collection) {
        self.state.switch_view(view);
    }

    pub fn begin_edit(&mut self, id: RecordId) -> Result<&PostEdit, DashboardError> {
        self.state.begin_edit(id)
    }

    pub fn update_edit(
        &mut self,
        pet_name: String,
        analysis_result: String,
    ) -> Result<(), DashboardError> {
        self.state.update_edit(pet_name, analysis_result)
    }

    pub fn cancel_edit(&mut self) -> Option<PostEdit> {
        self.state.cancel_edit()
    }

    /// Send the edit buffers as a partial update. On failure edit mode stays
    /// open with the buffers untouched.
    pub async fn save_post(&mut self) -> Result<RecordId, DashboardError> {
        let edit = self
            .state
            .editing()
            .cloned()
            .ok_or(DashboardError::NotEditing)?;

        if let Err(e) = self
            .store
            .update_by_id(Collection::Posts, edit.id, edit.patch())
            .await
        {
            tracing::error!(post = %edit.id, "Error updating post: {}", e);
            return Err(e.into());
        }

        tracing::info!(post = %edit.id, "post updated");
        self.state.cancel_edit();
        // A failed re-fetch is already logged; the update itself went through.
        let _ = self.refresh(Collection::Posts).await;
        Ok(edit.id)
    }

    /// Stage a post or comment for deletion. Nothing is sent until
    /// [`Dashboard::confirm_delete`].
    pub fn stage_delete(&mut self, target: DeleteTarget) {
        self.state.stage_delete(target);
    }

    pub fn cancel_delete(&mut self) -> Option<DeleteTarget> {
        self.state.cancel_delete()
    }

    /// Execute the staged delete, then re-fetch the collection it came from.
    /// On failure the target stays staged.
    pub async fn confirm_delete(&mut self) -> Result<DeleteTarget, DashboardError> {
        let target = self
            .state
            .pending_delete()
            .ok_or(DashboardError::NothingStaged)?;
        let collection = target.kind.collection();

        if let Err(e) = self.store.delete_by_id(collection, target.id).await {
            tracing::error!(%target, "Error deleting {}: {}", target.kind.label(), e);
            return Err(e.into());
        }

        tracing::info!(%target, "deleted");
        self.state.cancel_delete();
        let _ = self.refresh(collection).await;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use crate::store::{Fault, MemoryBackend, StoreCall, StoreConnector};
    use serde_json::json;

    fn dashboard() -> (MemoryBackend, Dashboard) {
        let backend = MemoryBackend::seeded();
        let dashboard = Dashboard::new(backend.connect());
        (backend, dashboard)
    }

    #[tokio::test]
    async fn refresh_all_loads_every_collection() {
        let (_backend, mut dashboard) = dashboard();

        let report = dashboard.refresh_all().await;
        assert!(report.is_complete());
        for collection in Collection::ALL {
            assert_eq!(dashboard.state().row_count(collection), 2, "{collection}");
        }
    }

    #[tokio::test]
    async fn one_failed_fetch_keeps_stale_rows_and_spares_the_rest() {
        let (backend, mut dashboard) = dashboard();
        dashboard.refresh_all().await;

        backend.set_rows(Collection::Likes, vec![]);
        backend.set_rows(Collection::Posts, vec![]);
        backend.inject(Fault::List(Collection::Likes));

        let report = dashboard.refresh_all().await;
        assert_eq!(report.failed, vec![Collection::Likes]);
        assert_eq!(dashboard.state().row_count(Collection::Likes), 2);
        assert_eq!(dashboard.state().row_count(Collection::Posts), 0);
    }

    #[tokio::test]
    async fn undecodable_rows_count_as_a_failed_fetch() {
        let (backend, mut dashboard) = dashboard();
        dashboard.refresh_all().await;

        backend.set_rows(Collection::Comments, vec![json!({ "id": "not-a-number" })]);
        let err = dashboard.refresh(Collection::Comments).await.unwrap_err();
        assert!(matches!(err, DashboardError::Decode { collection: Collection::Comments, .. }));
        assert_eq!(dashboard.state().row_count(Collection::Comments), 2);
    }

    #[tokio::test]
    async fn display_names_resolve_after_history_loads() {
        let (backend, mut dashboard) = dashboard();
        dashboard.refresh_all().await;

        let lookups: Vec<_> = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::ResolveDisplayNames(_)))
            .collect();
        assert_eq!(
            lookups,
            vec![StoreCall::ResolveDisplayNames(
                [UserId::new("user-1")].into_iter().collect()
            )]
        );
        assert_eq!(dashboard.state().display_name(&UserId::new("user-1")), Some("Maya"));
    }

    #[tokio::test]
    async fn all_anonymous_history_skips_the_lookup() {
        let (backend, mut dashboard) = dashboard();
        backend.set_rows(
            Collection::AnalysisHistory,
            vec![json!({ "id": 1, "user_id": null, "created_at": "2024-05-01T00:00:00Z" })],
        );

        dashboard.refresh(Collection::AnalysisHistory).await.unwrap();
        assert!(!backend
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::ResolveDisplayNames(_))));
    }

    #[tokio::test]
    async fn failed_name_lookup_is_not_a_failed_fetch() {
        let (backend, mut dashboard) = dashboard();
        backend.inject(Fault::DisplayNames);

        dashboard.refresh(Collection::AnalysisHistory).await.unwrap();
        assert_eq!(dashboard.state().row_count(Collection::AnalysisHistory), 2);
        assert_eq!(dashboard.state().display_name(&UserId::new("user-1")), None);
    }

    #[tokio::test]
    async fn save_without_edit_is_rejected_without_remote_calls() {
        let (backend, mut dashboard) = dashboard();
        assert!(matches!(
            dashboard.save_post().await,
            Err(DashboardError::NotEditing)
        ));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_save_keeps_the_users_edits() {
        let (backend, mut dashboard) = dashboard();
        dashboard.refresh_all().await;
        dashboard.begin_edit(RecordId(1)).unwrap();
        dashboard
            .update_edit("Biscuit Jr".into(), "1. still playful".into())
            .unwrap();

        backend.inject(Fault::Update);
        assert!(dashboard.save_post().await.is_err());

        let edit = dashboard.state().editing().unwrap();
        assert_eq!(edit.id, RecordId(1));
        assert_eq!(edit.pet_name, "Biscuit Jr");
        assert_eq!(edit.analysis_result, "1. still playful");
    }

    #[tokio::test]
    async fn failed_delete_keeps_target_staged() {
        let (backend, mut dashboard) = dashboard();
        dashboard.refresh_all().await;
        let target = DeleteTarget {
            kind: DeleteKind::Comment,
            id: RecordId(2),
        };
        dashboard.stage_delete(target);

        backend.inject(Fault::Delete);
        assert!(dashboard.confirm_delete().await.is_err());
        assert_eq!(dashboard.state().pending_delete(), Some(target));
        assert_eq!(dashboard.state().row_count(Collection::Comments), 2);
    }

    #[tokio::test]
    async fn confirm_with_nothing_staged_is_an_error() {
        let (backend, mut dashboard) = dashboard();
        assert!(matches!(
            dashboard.confirm_delete().await,
            Err(DashboardError::NothingStaged)
        ));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_post_leaves_its_comments_alone() {
        let (_backend, mut dashboard) = dashboard();
        dashboard.refresh_all().await;

        dashboard.stage_delete(DeleteTarget {
            kind: DeleteKind::Post,
            id: RecordId(1),
        });
        dashboard.confirm_delete().await.unwrap();

        assert_eq!(dashboard.state().row_count(Collection::Posts), 1);
        assert!(dashboard
            .state()
            .comments()
            .iter()
            .any(|c| c.post_id == RecordId(1)));
    }
}
