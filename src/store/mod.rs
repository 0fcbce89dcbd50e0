// Remote store seam. All backend side effects go through this trait.
pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::{Collection, RecordId, Session, UserId};

pub use memory::{Fault, MemoryBackend, MemoryStore, StoreCall};
pub use supabase::{SupabaseConnector, SupabaseStore};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Rejected by the auth provider. Carries the provider's own message.
    #[error("{0}")]
    Auth(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid backend URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Text suitable for showing to the person at the keyboard.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Auth(msg) => msg.clone(),
            StoreError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Provider-pushed session change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(Session),
}

impl SessionEvent {
    /// The session the event leaves behind.
    pub fn into_session(self) -> Option<Session> {
        match self {
            SessionEvent::SignedIn(s)
            | SessionEvent::TokenRefreshed(s)
            | SessionEvent::UserUpdated(s) => Some(s),
            SessionEvent::SignedOut => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SignedIn(_) => "SIGNED_IN",
            SessionEvent::SignedOut => "SIGNED_OUT",
            SessionEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
            SessionEvent::UserUpdated(_) => "USER_UPDATED",
        }
    }
}

/// One backend client. Like a browser-side SDK client it holds at most one
/// signed-in session, which it attaches to every row request.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Re-validate the held session with the provider. `None` when signed out
    /// or when the provider no longer accepts the token.
    async fn current_session(&self) -> Result<Option<Session>, StoreError>;

    /// Receive session changes. Dropping the receiver unsubscribes.
    fn subscribe_session_changes(&self) -> broadcast::Receiver<SessionEvent>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoreError>;

    async fn sign_out(&self) -> Result<(), StoreError>;

    /// Every row of a collection, undecoded.
    async fn list_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;

    /// Partial update of one row. `fields` is a JSON object of column values.
    async fn update_by_id(
        &self,
        collection: Collection,
        id: RecordId,
        fields: Value,
    ) -> Result<(), StoreError>;

    async fn delete_by_id(&self, collection: Collection, id: RecordId) -> Result<(), StoreError>;

    /// Batch lookup of display names. Ids without a name are simply absent.
    async fn resolve_display_names(
        &self,
        user_ids: &BTreeSet<UserId>,
    ) -> Result<HashMap<UserId, String>, StoreError>;
}

/// Hands out one fresh store client per console.
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> DynRemoteStore;
}

pub type DynRemoteStore = Arc<dyn RemoteStore>;
pub type DynStoreConnector = Arc<dyn StoreConnector>;

/// Capacity of each client's session event channel.
pub(crate) const SESSION_EVENT_CAPACITY: usize = 16;
