// HTTP client for a Supabase-style project: GoTrue auth plus PostgREST rows.
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use url::Url;

use super::{
    DynRemoteStore, RemoteStore, SessionEvent, StoreConnector, StoreError,
    SESSION_EVENT_CAPACITY,
};
use crate::config::{BackendConfig, TablesConfig};
use crate::models::{Collection, RecordId, Role, Session, UserId};

const DISPLAY_NAMES_RPC: &str = "get_user_display_names";

/// Refresh this long before the provider's stated expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Shared HTTP client and project settings; connects one store per console.
pub struct SupabaseConnector {
    http: Client,
    base: Url,
    anon_key: String,
    tables: Arc<TablesConfig>,
}

impl SupabaseConnector {
    pub fn new(backend: &BackendConfig, tables: &TablesConfig) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(backend.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base: base_url(&backend.url)?,
            anon_key: backend.anon_key.clone(),
            tables: Arc::new(tables.clone()),
        })
    }
}

impl StoreConnector for SupabaseConnector {
    fn connect(&self) -> DynRemoteStore {
        Arc::new(SupabaseStore::new(
            self.http.clone(),
            self.base.clone(),
            self.anon_key.clone(),
            self.tables.clone(),
        ))
    }
}

/// Accept `https://xyz.supabase.co` with or without a trailing slash.
fn base_url(raw: &str) -> Result<Url, StoreError> {
    let mut base = raw.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?)
}

pub struct SupabaseStore {
    http: Client,
    base: Url,
    anon_key: String,
    tables: Arc<TablesConfig>,
    held: RwLock<Option<Held>>,
    refreshing: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

/// The signed-in session plus what is needed to renew it.
#[derive(Debug, Clone)]
struct Held {
    session: Session,
    refresh_token: Option<String>,
    expires_at: Option<Instant>,
}

impl Held {
    fn from_token(token: TokenResponse) -> Self {
        Self {
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
            refresh_token: token.refresh_token,
            session: token.user.into_session(token.access_token),
        }
    }

    fn expiring(&self, now: Instant) -> bool {
        self.refresh_token.is_some()
            && self
                .expires_at
                .is_some_and(|at| now + REFRESH_MARGIN >= at)
    }
}

// -- Wire types --

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Seconds until `access_token` lapses.
    #[serde(default)]
    expires_in: Option<u64>,
    user: AuthUser,
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    app_metadata: AppMetadata,
}

#[derive(Deserialize, Default)]
struct AppMetadata {
    #[serde(default)]
    role: Option<String>,
}

impl AuthUser {
    fn into_session(self, access_token: String) -> Session {
        Session {
            role: Role::from_metadata(self.app_metadata.role.as_deref()),
            user_id: UserId(self.id),
            email: self.email,
            access_token,
        }
    }
}

#[derive(Deserialize)]
struct DisplayNameRow {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

/// Pull a readable message out of a GoTrue or PostgREST error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

async fn failure(response: Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body
        }
    });
    StoreError::Status {
        status: status.as_u16(),
        message,
    }
}

impl SupabaseStore {
    pub fn new(http: Client, base: Url, anon_key: String, tables: Arc<TablesConfig>) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            http,
            base,
            anon_key,
            tables,
            held: RwLock::new(None),
            refreshing: Mutex::new(()),
            events,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(path)?)
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

    fn drop_session(&self) {
        self.set_held(None);
        self.publish(SessionEvent::SignedOut);
    }

    fn publish(&self, event: SessionEvent) {
        tracing::debug!(event = event.name(), "session change");
        let _ = self.events.send(event);
    }

    /// Request with project key and the held session's bearer token (or the
    /// anon key when signed out).
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let bearer = self
            .held_session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.anon_key.clone());
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    fn table_url(&self, collection: Collection) -> Result<Url, StoreError> {
        self.endpoint(&format!("rest/v1/{}", self.tables.table_for(collection)))
    }

    fn row_url(&self, collection: Collection, id: RecordId) -> Result<Url, StoreError> {
        let mut url = self.table_url(collection)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{}", id));
        Ok(url)
    }

    /// Turn a non-success row response into an error. A 401 means the
    /// provider dropped our token, which is pushed to subscribers as a
    /// sign-out.
    async fn check(&self, response: Response) -> Result<Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }
        if response.status() == StatusCode::UNAUTHORIZED && self.held_session().is_some() {
            tracing::warn!("Backend rejected access token, signing out");
            self.drop_session();
        }
        Err(failure(response).await)
    }

    /// Trade the refresh token for a new access token. `stale` is the token
    /// the caller saw fail; if another request already replaced it there is
    /// nothing to do. A rejected refresh ends the session.
    async fn refresh_session(&self, stale: &str) -> Result<(), StoreError> {
        let _refreshing = self.refreshing.lock().await;

        let Some(held) = self.held() else {
            return Err(StoreError::NotSignedIn);
        };
        if held.session.access_token != stale {
            return Ok(());
        }
        let Some(refresh_token) = held.refresh_token else {
            return Err(StoreError::NotSignedIn);
        };

        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "refresh_token");
        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        if !response.status().is_success() {
            let err = failure(response).await;
            tracing::warn!("Token refresh rejected, signing out: {}", err);
            self.drop_session();
            return Err(StoreError::NotSignedIn);
        }

        let token: TokenResponse = response.json().await?;
        let renewed = Held::from_token(token);
        let session = renewed.session.clone();
        self.set_held(Some(renewed));
        self.publish(SessionEvent::TokenRefreshed(session));
        Ok(())
    }

    /// Send a bearer request, renewing the access token first when it is
    /// about to lapse and once more if the provider answers 401.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, StoreError>
    where
        F: Fn(&Self) -> RequestBuilder + Send + Sync,
    {
        if let Some(held) = self.held() {
            if held.expiring(Instant::now()) {
                self.refresh_session(&held.session.access_token).await?;
            }
        }

        let sent_with = self.held();
        let response = build(self).send().await?;

        match sent_with {
            Some(held)
                if response.status() == StatusCode::UNAUTHORIZED
                    && held.refresh_token.is_some() =>
            {
                tracing::debug!("access token rejected, refreshing");
                self.refresh_session(&held.session.access_token).await?;
                let retried = build(self).send().await?;
                self.check(retried).await
            }
            _ => self.check(response).await,
        }
    }
}

#[async_trait]
impl RemoteStore for SupabaseStore {
    async fn current_session(&self) -> Result<Option<Session>, StoreError> {
        if self.held().is_none() {
            return Ok(None);
        }

        let url = self.endpoint("auth/v1/user")?;
        let response = match self
            .send_authorized(|store| store.request(Method::GET, url.clone()))
            .await
        {
            Ok(response) => response,
            Err(StoreError::NotSignedIn) => return Ok(None),
            Err(StoreError::Status {
                status: 401 | 403, ..
            }) => {
                if self.held().is_some() {
                    self.drop_session();
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let user: AuthUser = response.json().await?;
        let Some(mut held) = self.held() else {
            return Ok(None);
        };
        let session = user.into_session(held.session.access_token.clone());
        if session != held.session {
            held.session = session.clone();
            self.set_held(Some(held));
            self.publish(SessionEvent::UserUpdated(session.clone()));
        }
        Ok(Some(session))
    }

    fn subscribe_session_changes(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(match failure(response).await {
                StoreError::Status { message, .. } => StoreError::Auth(message),
                other => other,
            });
        }

        let token: TokenResponse = response.json().await?;
        let held = Held::from_token(token);
        let session = held.session.clone();
        self.set_held(Some(held));
        self.publish(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        if self.held_session().is_none() {
            return Ok(());
        }

        let sent = match self.endpoint("auth/v1/logout") {
            Ok(url) => self.request(Method::POST, url).send().await.map_err(StoreError::from),
            Err(e) => Err(e),
        };

        // Local state is dropped whatever the provider said.
        self.drop_session();

        let response = sent?;
        if response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED {
            Ok(())
        } else {
            Err(failure(response).await)
        }
    }

    async fn list_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let mut url = self.table_url(collection)?;
        url.query_pairs_mut().append_pair("select", "*");

        let response = self
            .send_authorized(|store| store.request(Method::GET, url.clone()))
            .await?;
        Ok(response.json().await?)
    }

    async fn update_by_id(
        &self,
        collection: Collection,
        id: RecordId,
        fields: Value,
    ) -> Result<(), StoreError> {
        let url = self.row_url(collection, id)?;
        self.send_authorized(|store| {
            store
                .request(Method::PATCH, url.clone())
                .header("Prefer", "return=minimal")
                .json(&fields)
        })
        .await?;
        Ok(())
    }

    async fn delete_by_id(&self, collection: Collection, id: RecordId) -> Result<(), StoreError> {
        let url = self.row_url(collection, id)?;
        self.send_authorized(|store| {
            store
                .request(Method::DELETE, url.clone())
                .header("Prefer", "return=minimal")
        })
        .await?;
        Ok(())
    }

    async fn resolve_display_names(
        &self,
        user_ids: &BTreeSet<UserId>,
    ) -> Result<HashMap<UserId, String>, StoreError> {
        let url = self.endpoint(&format!("rest/v1/rpc/{}", DISPLAY_NAMES_RPC))?;
        let ids: Vec<&str> = user_ids.iter().map(UserId::as_str).collect();

        let body = json!({ "user_ids": ids });
        let response = self
            .send_authorized(|store| store.request(Method::POST, url.clone()).json(&body))
            .await?;
        let rows: Vec<DisplayNameRow> = response.json().await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.display_name.map(|name| (UserId(row.id), name)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = base_url("https://abc.supabase.co").unwrap();
        assert_eq!(url.join("rest/v1/posts").unwrap().as_str(), "https://abc.supabase.co/rest/v1/posts");
    }

    #[test]
    fn base_url_rejects_garbage() {
        assert!(base_url("not a url").is_err());
    }

    #[test]
    fn error_message_prefers_description() {
        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        assert_eq!(error_message(body).as_deref(), Some("Invalid login credentials"));
    }

    #[test]
    fn error_message_reads_postgrest_message() {
        let body = r#"{"code":"42501","message":"permission denied for table newsfeed_posts"}"#;
        assert_eq!(
            error_message(body).as_deref(),
            Some("permission denied for table newsfeed_posts")
        );
    }

    #[test]
    fn error_message_ignores_non_json() {
        assert_eq!(error_message("<html>bad gateway</html>"), None);
    }

    #[test]
    fn auth_user_without_metadata_is_member() {
        let user: AuthUser = serde_json::from_str(r#"{"id":"u1","email":"a@b.c"}"#).unwrap();
        let session = user.into_session("tok".into());
        assert_eq!(session.role, Role::Member);
        assert_eq!(session.user_id, UserId::new("u1"));
    }

    #[test]
    fn token_response_keeps_refresh_details() {
        let body = r#"{
            "access_token": "at-1",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "rt-1",
            "user": {"id": "u1", "email": "a@b.c", "app_metadata": {"role": "admin"}}
        }"#;
        let token: TokenResponse = serde_json::from_str(body).unwrap();
        let now = Instant::now();
        let held = Held::from_token(token);

        assert_eq!(held.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(held.session.access_token, "at-1");
        assert!(held.session.is_admin());
        assert!(!held.expiring(now));
        assert!(held.expiring(now + Duration::from_secs(3600 - 30)));
    }

    #[test]
    fn session_without_refresh_token_never_counts_as_expiring() {
        let body = r#"{"access_token":"at","expires_in":1,"user":{"id":"u1"}}"#;
        let held = Held::from_token(serde_json::from_str(body).unwrap());
        assert!(!held.expiring(Instant::now() + Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn refresh_without_a_session_is_not_signed_in() {
        let store = SupabaseStore::new(
            Client::new(),
            base_url("https://abc.supabase.co").unwrap(),
            "anon".into(),
            Arc::new(TablesConfig::default()),
        );
        assert!(matches!(
            store.refresh_session("at").await,
            Err(StoreError::NotSignedIn)
        ));
    }

    #[test]
    fn row_url_filters_by_id() {
        let store = SupabaseStore::new(
            Client::new(),
            base_url("https://abc.supabase.co").unwrap(),
            "anon".into(),
            Arc::new(TablesConfig::default()),
        );
        let url = store.row_url(Collection::Comments, RecordId(3)).unwrap();
        assert_eq!(
            url.as_str(),
            "https://abc.supabase.co/rest/v1/newsfeed_comments?id=eq.3"
        );
    }
}
