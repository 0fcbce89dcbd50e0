// In-process backend. Backs the test suite and `--demo` mode.
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;

use super::{
    DynRemoteStore, RemoteStore, SessionEvent, StoreConnector, StoreError,
    SESSION_EVENT_CAPACITY,
};
use crate::models::{Collection, RecordId, Role, Session, UserId};

/// Every operation a client performed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    CurrentSession,
    SignIn { email: String },
    SignOut,
    ListAll(Collection),
    UpdateById {
        collection: Collection,
        id: RecordId,
        fields: Value,
    },
    DeleteById {
        collection: Collection,
        id: RecordId,
    },
    ResolveDisplayNames(BTreeSet<UserId>),
    RefreshSession,
}

/// Oldest journal entries are dropped past this many.
pub const JOURNAL_CAPACITY: usize = 512;

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// The provider cannot be reached to check the held session.
    Session,
    /// Refresh tokens are rejected.
    Refresh,
    List(Collection),
    Update,
    Delete,
    DisplayNames,
    SignOut,
}

#[derive(Debug, Clone)]
struct Account {
    id: UserId,
    email: String,
    password: String,
    role: Role,
    display_name: Option<String>,
}

/// A signed-in session as the backend sees it, keyed by refresh token.
/// Removed on sign-out or revocation.
#[derive(Debug, Clone)]
struct Grant {
    access_token: String,
    expired: bool,
}

#[derive(Debug, Default)]
struct Dataset {
    accounts: Vec<Account>,
    tables: HashMap<Collection, Vec<Value>>,
    grants: HashMap<String, Grant>,
    calls: VecDeque<StoreCall>,
    faults: HashSet<Fault>,
    issued: u64,
}

impl Dataset {
    fn issue(&mut self, prefix: &str) -> String {
        self.issued += 1;
        format!("memory-{}-{}", prefix, self.issued)
    }

    fn grant_for(&mut self, access_token: &str) -> Option<&mut Grant> {
        self.grants
            .values_mut()
            .find(|g| g.access_token == access_token)
    }
}

/// Shared dataset that every connected [`MemoryStore`] reads and writes.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<Mutex<Dataset>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small fixture set: one admin, one member, a handful of rows per table.
    pub fn seeded() -> Self {
        let backend = Self::new();
        backend.add_account("admin-1", "admin@pawscan.test", "pawscan-admin", Role::Admin, Some("Admin"));
        backend.add_account("user-1", "maya@pawscan.test", "maya-pass", Role::Member, Some("Maya"));
        backend.add_account("user-2", "leo@pawscan.test", "leo-pass", Role::Member, Some("Leo"));

        backend.set_rows(
            Collection::Posts,
            vec![
                json!({
                    "id": 1,
                    "image_url": "https://cdn.pawscan.test/posts/biscuit.jpg",
                    "analysis_result": "1. Breed: Golden Retriever\n2. Mood: playful\n3. Coat looks healthy",
                    "pet_name": "Biscuit",
                    "display_name": "Maya",
                    "is_anonymous": false,
                    "created_at": "2024-05-01T09:30:00Z"
                }),
                json!({
                    "id": 2,
                    "image_url": "https://cdn.pawscan.test/posts/miso.jpg",
                    "analysis_result": "1. Breed: Siamese\n2. Mood: sleepy",
                    "pet_name": "Miso",
                    "display_name": null,
                    "is_anonymous": true,
                    "created_at": "2024-05-02T18:05:00Z"
                }),
            ],
        );
        backend.set_rows(
            Collection::Comments,
            vec![
                json!({
                    "id": 1,
                    "post_id": 1,
                    "display_name": "Leo",
                    "comment_text": "What a good dog!",
                    "role": "user",
                    "created_at": "2024-05-01T10:00:00Z"
                }),
                json!({
                    "id": 2,
                    "post_id": 2,
                    "display_name": "Admin",
                    "comment_text": "Welcome to PawScan.",
                    "role": "admin",
                    "created_at": "2024-05-02T19:00:00Z"
                }),
            ],
        );
        backend.set_rows(
            Collection::Likes,
            vec![
                json!({ "id": 1, "post_id": 1, "user_id": "user-2", "created_at": "2024-05-01T10:01:00Z" }),
                json!({ "id": 2, "post_id": 2, "user_id": "user-1", "created_at": "2024-05-02T19:30:00Z" }),
            ],
        );
        backend.set_rows(
            Collection::AnalysisHistory,
            vec![
                json!({
                    "id": 1,
                    "user_id": "user-1",
                    "image_url": "https://cdn.pawscan.test/history/1.jpg",
                    "analysis_result": "1. Breed: Golden Retriever\n2. Mood: playful",
                    "created_at": "2024-05-01T09:00:00Z"
                }),
                json!({
                    "id": 2,
                    "user_id": null,
                    "image_url": "https://cdn.pawscan.test/history/2.jpg",
                    "analysis_result": "1. Breed: Tabby",
                    "created_at": "2024-05-03T08:15:00Z"
                }),
            ],
        );
        backend
    }

    pub fn add_account(
        &self,
        id: &str,
        email: &str,
        password: &str,
        role: Role,
        display_name: Option<&str>,
    ) {
        self.lock().accounts.push(Account {
            id: UserId::new(id),
            email: email.to_string(),
            password: password.to_string(),
            role,
            display_name: display_name.map(str::to_string),
        });
    }

    /// Replace a table's contents. Not journaled.
    pub fn set_rows(&self, collection: Collection, rows: Vec<Value>) {
        self.lock().tables.insert(collection, rows);
    }

    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.lock().tables.get(&collection).cloned().unwrap_or_default()
    }

    /// The most recent calls, oldest first. At most [`JOURNAL_CAPACITY`].
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.iter().cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.insert(fault);
    }

    pub fn heal(&self, fault: Fault) {
        self.lock().faults.remove(&fault);
    }

    /// End the session behind an access token, as if an operator revoked it.
    pub fn revoke(&self, access_token: &str) {
        let mut data = self.lock();
        data.grants.retain(|_, g| g.access_token != access_token);
    }

    /// Let an access token lapse. Its refresh token still works.
    pub fn expire(&self, access_token: &str) {
        if let Some(grant) = self.lock().grant_for(access_token) {
            grant.expired = true;
        }
    }

    /// Number of sessions the backend still honours.
    pub fn live_sessions(&self) -> usize {
        self.lock().grants.len()
    }

    fn lock(&self) -> MutexGuard<'_, Dataset> {
        // A panicking test thread must not wedge the rest of the suite.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StoreConnector for MemoryBackend {
    fn connect(&self) -> DynRemoteStore {
        Arc::new(MemoryStore::new(self.clone()))
    }
}

#[derive(Debug, Clone)]
struct Held {
    session: Session,
    refresh_token: String,
}

enum Checked {
    Anonymous,
    Valid,
    Revoked,
}

/// One client of a [`MemoryBackend`], holding its own session.
pub struct MemoryStore {
    backend: MemoryBackend,
    held: RwLock<Option<Held>>,
    events: broadcast::Sender<SessionEvent>,
}

impl MemoryStore {
    pub fn new(backend: MemoryBackend) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            backend,
            held: RwLock::new(None),
            events,
        }
    }

    fn held(&self) -> Option<Held> {
        self.held
            .read()
            .map(|h| h.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn held_session(&self) -> Option<Session> {
        self.held().map(|h| h.session)
    }

    fn set_held(&self, held: Option<Held>) {
        let mut slot = self
            .held
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = held;
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn record(&self, data: &mut Dataset, call: StoreCall) {
        tracing::trace!(?call, "memory store call");
        if data.calls.len() >= JOURNAL_CAPACITY {
            data.calls.pop_front();
        }
        data.calls.push_back(call);
    }

    /// Compare the held session with the backend's grants. A lapsed access
    /// token is swapped for a new one; a revoked or unrefreshable session is
    /// dropped and pushed as a sign-out.
    fn check_session(&self, data: &mut Dataset) -> Checked {
        let Some(held) = self.held() else {
            return Checked::Anonymous;
        };

        let grant = data.grants.get(&held.refresh_token).cloned();
        match grant {
            Some(grant) if !grant.expired && grant.access_token == held.session.access_token => {
                Checked::Valid
            }
            Some(_) if !data.faults.contains(&Fault::Refresh) => {
                self.record(data, StoreCall::RefreshSession);
                let access_token = data.issue("token");
                if let Some(grant) = data.grants.get_mut(&held.refresh_token) {
                    grant.access_token = access_token.clone();
                    grant.expired = false;
                }
                let session = Session {
                    access_token,
                    ..held.session
                };
                self.set_held(Some(Held {
                    session: session.clone(),
                    refresh_token: held.refresh_token,
                }));
                self.publish(SessionEvent::TokenRefreshed(session));
                Checked::Valid
            }
            _ => {
                data.grants.remove(&held.refresh_token);
                self.set_held(None);
                self.publish(SessionEvent::SignedOut);
                Checked::Revoked
            }
        }
    }

    /// Row access with whatever session is held. Anonymous access is allowed.
    fn authorize(&self, data: &mut Dataset) -> Result<(), StoreError> {
        match self.check_session(data) {
            Checked::Revoked => Err(StoreError::NotSignedIn),
            Checked::Anonymous | Checked::Valid => Ok(()),
        }
    }
}

fn injected(fault: Fault) -> StoreError {
    StoreError::Unavailable(format!("injected fault: {:?}", fault))
}

fn row_id(row: &Value) -> Option<i64> {
    row.get("id").and_then(Value::as_i64)
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn current_session(&self) -> Result<Option<Session>, StoreError> {
        let mut data = self.backend.lock();
        self.record(&mut data, StoreCall::CurrentSession);
        if data.faults.contains(&Fault::Session) {
            return Err(injected(Fault::Session));
        }

        match self.check_session(&mut data) {
            Checked::Valid => Ok(self.held_session()),
            Checked::Anonymous | Checked::Revoked => Ok(None),
        }
    }

    fn subscribe_session_changes(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        let session = {
            let mut data = self.backend.lock();
            self.record(
                &mut data,
                StoreCall::SignIn {
                    email: email.to_string(),
                },
            );

            let account = data
                .accounts
                .iter()
                .find(|a| a.email.eq_ignore_ascii_case(email) && a.password == password)
                .cloned()
                .ok_or_else(|| StoreError::Auth("Invalid login credentials".to_string()))?;

            // A new sign-in replaces whatever this client held before.
            if let Some(previous) = self.held() {
                data.grants.remove(&previous.refresh_token);
            }

            let access_token = data.issue("token");
            let refresh_token = data.issue("refresh");
            let session = Session {
                user_id: account.id,
                email: Some(account.email),
                access_token: access_token.clone(),
                role: account.role,
            };
            data.grants.insert(
                refresh_token.clone(),
                Grant {
                    access_token,
                    expired: false,
                },
            );
            self.set_held(Some(Held {
                session: session.clone(),
                refresh_token,
            }));
            session
        };

        self.publish(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        let result = {
            let mut data = self.backend.lock();
            self.record(&mut data, StoreCall::SignOut);
            if data.faults.contains(&Fault::SignOut) {
                Err(injected(Fault::SignOut))
            } else {
                if let Some(held) = self.held() {
                    data.grants.remove(&held.refresh_token);
                }
                Ok(())
            }
        };

        self.set_held(None);
        self.publish(SessionEvent::SignedOut);
        result
    }

    async fn list_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let mut data = self.backend.lock();
        self.record(&mut data, StoreCall::ListAll(collection));
        self.authorize(&mut data)?;
        if data.faults.contains(&Fault::List(collection)) {
            return Err(injected(Fault::List(collection)));
        }
        Ok(data.tables.get(&collection).cloned().unwrap_or_default())
    }

    async fn update_by_id(
        &self,
        collection: Collection,
        id: RecordId,
        fields: Value,
    ) -> Result<(), StoreError> {
        let mut data = self.backend.lock();
        self.record(
            &mut data,
            StoreCall::UpdateById {
                collection,
                id,
                fields: fields.clone(),
            },
        );
        self.authorize(&mut data)?;
        if data.faults.contains(&Fault::Update) {
            return Err(injected(Fault::Update));
        }

        let Value::Object(patch) = fields else {
            return Err(StoreError::Status {
                status: 400,
                message: "Update body must be a JSON object".to_string(),
            });
        };

        // Matching zero rows is not an error, same as a filtered PATCH.
        if let Some(rows) = data.tables.get_mut(&collection) {
            for row in rows.iter_mut().filter(|r| row_id(r) == Some(id.get())) {
                if let Value::Object(existing) = row {
                    for (column, value) in &patch {
                        existing.insert(column.clone(), value.clone());
                    }
                }
            }
        }
        Ok(())
    }

    async fn delete_by_id(&self, collection: Collection, id: RecordId) -> Result<(), StoreError> {
        let mut data = self.backend.lock();
        self.record(&mut data, StoreCall::DeleteById { collection, id });
        self.authorize(&mut data)?;
        if data.faults.contains(&Fault::Delete) {
            return Err(injected(Fault::Delete));
        }
        if let Some(rows) = data.tables.get_mut(&collection) {
            rows.retain(|r| row_id(r) != Some(id.get()));
        }
        Ok(())
    }

    async fn resolve_display_names(
        &self,
        user_ids: &BTreeSet<UserId>,
    ) -> Result<HashMap<UserId, String>, StoreError> {
        let mut data = self.backend.lock();
        self.record(&mut data, StoreCall::ResolveDisplayNames(user_ids.clone()));
        self.authorize(&mut data)?;
        if data.faults.contains(&Fault::DisplayNames) {
            return Err(injected(Fault::DisplayNames));
        }
        Ok(data
            .accounts
            .iter()
            .filter(|a| user_ids.contains(&a.id))
            .filter_map(|a| a.display_name.clone().map(|name| (a.id.clone(), name)))
            .collect())
    }
}
