// Dashboard view state. Pure transitions; remote calls live in the controller.
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::models::{AnalysisRecord, Collection, Comment, Like, Post, RecordId, UserId};

use super::DashboardError;

/// Inline edit of one post. Only one exists at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostEdit {
    pub id: RecordId,
    pub pet_name: String,
    pub analysis_result: String,
}

impl PostEdit {
    /// Columns sent as the partial update.
    pub fn patch(&self) -> Value {
        json!({
            "pet_name": self.pet_name,
            "analysis_result": self.analysis_result,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeleteKind {
    Post,
    Comment,
}

impl DeleteKind {
    /// Dispatch table from what is being deleted to where it lives.
    pub fn collection(self) -> Collection {
        match self {
            DeleteKind::Post => Collection::Posts,
            DeleteKind::Comment => Collection::Comments,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeleteKind::Post => "post",
            DeleteKind::Comment => "comment",
        }
    }
}

impl FromStr for DeleteKind {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posts" => Ok(DeleteKind::Post),
            "comments" => Ok(DeleteKind::Comment),
            other => Err(DashboardError::NotDeletable(other.to_string())),
        }
    }
}

/// A delete waiting for confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteTarget {
    pub kind: DeleteKind,
    pub id: RecordId,
}

impl fmt::Display for DeleteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.label(), self.id)
    }
}

#[derive(Debug, Clone)]
pub struct DashboardState {
    posts: Vec<Post>,
    comments: Vec<Comment>,
    likes: Vec<Like>,
    analysis_history: Vec<AnalysisRecord>,
    display_names: HashMap<UserId, String>,
    active_view: Collection,
    editing: Option<PostEdit>,
    pending_delete: Option<DeleteTarget>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            posts: Vec::new(),
            comments: Vec::new(),
            likes: Vec::new(),
            analysis_history: Vec::new(),
            display_names: HashMap::new(),
            active_view: Collection::Posts,
            editing: None,
            pending_delete: None,
        }
    }
}

impl DashboardState {
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn likes(&self) -> &[Like] {
        &self.likes
    }

    pub fn analysis_history(&self) -> &[AnalysisRecord] {
        &self.analysis_history
    }

    pub fn active_view(&self) -> Collection {
        self.active_view
    }

    pub fn editing(&self) -> Option<&PostEdit> {
        self.editing.as_ref()
    }

    pub fn pending_delete(&self) -> Option<DeleteTarget> {
        self.pending_delete
    }

    pub fn display_name(&self, user_id: &UserId) -> Option<&str> {
        self.display_names.get(user_id).map(String::as_str)
    }

    pub fn row_count(&self, collection: Collection) -> usize {
        match collection {
            Collection::Posts => self.posts.len(),
            Collection::Comments => self.comments.len(),
            Collection::Likes => self.likes.len(),
            Collection::AnalysisHistory => self.analysis_history.len(),
        }
    }

    pub fn replace_posts(&mut self, posts: Vec<Post>) {
        self.posts = posts;
    }

    pub fn replace_comments(&mut self, comments: Vec<Comment>) {
        self.comments = comments;
    }

    pub fn replace_likes(&mut self, likes: Vec<Like>) {
        self.likes = likes;
    }

    pub fn replace_analysis_history(&mut self, rows: Vec<AnalysisRecord>) {
        self.analysis_history = rows;
    }

    /// Distinct owners referenced by analysis history. Anonymous rows add
    /// nothing.
    pub fn history_owners(&self) -> BTreeSet<UserId> {
        self.analysis_history
            .iter()
            .filter_map(|row| row.user_id.clone())
            .collect()
    }

    /// Add resolved names. Earlier names are never evicted.
    pub fn merge_display_names(&mut self, names: HashMap<UserId, String>) {
        self.display_names.extend(names);
    }

    pub fn switch_view(&mut self, view: Collection) {
        self.active_view = view;
    }

    /// Open `id` for editing, snapshotting its current values. Replaces any
    /// edit already open.
    pub fn begin_edit(&mut self, id: RecordId) -> Result<&PostEdit, DashboardError> {
        let post = self
            .posts
            .iter()
            .find(|p| p.id == id)
            .ok_or(DashboardError::UnknownPost(id))?;

        let edit = PostEdit {
            id,
            pet_name: post.pet_name.clone().unwrap_or_default(),
            analysis_result: post.analysis_result.clone().unwrap_or_default(),
        };
        Ok(&*self.editing.insert(edit))
    }

    pub fn update_edit(
        &mut self,
        pet_name: String,
        analysis_result: String,
    ) -> Result<(), DashboardError> {
        let edit = self.editing.as_mut().ok_or(DashboardError::NotEditing)?;
        edit.pet_name = pet_name;
        edit.analysis_result = analysis_result;
        Ok(())
    }

    pub fn cancel_edit(&mut self) -> Option<PostEdit> {
        self.editing.take()
    }

    /// Stage a delete. Replaces any target already staged.
    pub fn stage_delete(&mut self, target: DeleteTarget) {
        self.pending_delete = Some(target);
    }

    pub fn cancel_delete(&mut self) -> Option<DeleteTarget> {
        self.pending_delete.take()
    }
}
