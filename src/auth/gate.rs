// Session Gate: cached identity, provider change feed, and the one admin guard.
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::Session;
use crate::store::{DynRemoteStore, StoreError};

/// Where the browser should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Public login page. Also the landing page for signed-in non-admins.
    Login,
    Admin,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Login => "/",
            Route::Admin => "/admin",
        }
    }

    /// Path with a message for the page to show, e.g. `/?error=...`.
    pub fn with_error(self, message: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
        format!("{}?error={}", self.path(), encoded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Redirect(Route),
}

/// The single role check shared by the login and dashboard flows.
pub fn guard(session: Option<&Session>) -> Access {
    match session {
        Some(session) if session.is_admin() => Access::Allow,
        _ => Access::Redirect(Route::Login),
    }
}

/// Where a session belongs once it is known.
pub fn landing(session: Option<&Session>) -> Route {
    match guard(session) {
        Access::Allow => Route::Admin,
        Access::Redirect(route) => route,
    }
}

pub struct SessionGate {
    store: DynRemoteStore,
    current: Arc<watch::Sender<Option<Session>>>,
}

impl SessionGate {
    pub fn new(store: DynRemoteStore) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            store,
            current: Arc::new(current),
        }
    }

    /// Ask the provider who we are and cache the answer.
    pub async fn resolve(&self) -> Result<Option<Session>, StoreError> {
        let session = self.store.current_session().await?;
        self.current.send_replace(session.clone());
        Ok(session)
    }

    /// Cached session, as of the last resolve, login or pushed event.
    pub fn session(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }

    pub fn guard(&self) -> Access {
        guard(self.current.borrow().as_ref())
    }

    /// Follow provider-pushed session changes until the returned handle is
    /// dropped.
    pub fn subscribe(&self) -> SessionSubscription {
        let mut events = self.store.subscribe_session_changes();
        let current = self.current.clone();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        tracing::debug!(event = event.name(), "session event");
                        current.send_replace(event.into_session());
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "session events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        SessionSubscription { task }
    }

    /// Sign in and report where the browser should go next. The provider's
    /// rejection is returned untouched so its message can be shown.
    pub async fn login(&self, email: &str, password: &str) -> Result<Route, StoreError> {
        let session = self.store.sign_in(email.trim(), password).await?;
        let route = landing(Some(&session));
        if route != Route::Admin {
            tracing::info!(user = %session.user_id, "non-admin sign-in");
        }
        self.current.send_replace(Some(session));
        Ok(route)
    }

    /// Sign out. The cached session is cleared even if the provider call
    /// fails; the browser goes to [`Route::Login`] either way.
    pub async fn logout(&self) -> Result<Route, StoreError> {
        let result = self.store.sign_out().await;
        self.current.send_replace(None);
        result.map(|()| Route::Login)
    }
}

/// Live session-change subscription. Unsubscribes on drop.
pub struct SessionSubscription {
    task: JoinHandle<()>,
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, UserId};
    use crate::store::{MemoryBackend, StoreCall, StoreConnector};
    use std::time::Duration;

    fn session(role: Role) -> Session {
        Session {
            user_id: UserId::new("u1"),
            email: Some("u1@pawscan.test".into()),
            access_token: "tok".into(),
            role,
        }
    }

    #[test]
    fn guard_redirects_everyone_but_admins() {
        assert_eq!(guard(None), Access::Redirect(Route::Login));
        assert_eq!(
            guard(Some(&session(Role::Member))),
            Access::Redirect(Route::Login)
        );
        assert_eq!(guard(Some(&session(Role::Admin))), Access::Allow);
    }

    #[test]
    fn landing_sends_admins_to_dashboard() {
        assert_eq!(landing(Some(&session(Role::Admin))), Route::Admin);
        assert_eq!(landing(Some(&session(Role::Member))), Route::Login);
        assert_eq!(landing(None), Route::Login);
        assert_eq!(Route::Admin.path(), "/admin");
        assert_eq!(Route::Login.path(), "/");
        assert_eq!(
            Route::Login.with_error("Token expired & gone"),
            "/?error=Token+expired+%26+gone"
        );
    }

    #[tokio::test]
    async fn admin_login_lands_on_dashboard() {
        let backend = MemoryBackend::seeded();
        let gate = SessionGate::new(backend.connect());

        let route = gate.login("admin@pawscan.test", "pawscan-admin").await.unwrap();
        assert_eq!(route, Route::Admin);
        assert_eq!(gate.guard(), Access::Allow);
    }

    #[tokio::test]
    async fn member_login_is_kept_off_the_dashboard() {
        let backend = MemoryBackend::seeded();
        let gate = SessionGate::new(backend.connect());

        let route = gate.login("maya@pawscan.test", "maya-pass").await.unwrap();
        assert_eq!(route, Route::Login);
        assert_eq!(gate.guard(), Access::Redirect(Route::Login));
    }

    #[tokio::test]
    async fn failed_login_surfaces_provider_message_and_stays_signed_out() {
        let backend = MemoryBackend::seeded();
        let gate = SessionGate::new(backend.connect());

        let err = gate.login("admin@pawscan.test", "nope").await.unwrap_err();
        assert_eq!(err.user_message(), "Invalid login credentials");
        assert!(gate.session().is_none());
    }

    #[tokio::test]
    async fn logout_failure_still_clears_session() {
        let backend = MemoryBackend::seeded();
        let gate = SessionGate::new(backend.connect());
        gate.login("admin@pawscan.test", "pawscan-admin").await.unwrap();

        backend.inject(crate::store::Fault::SignOut);
        assert!(gate.logout().await.is_err());
        assert!(gate.session().is_none());
        assert_eq!(gate.guard(), Access::Redirect(Route::Login));
    }

    #[tokio::test]
    async fn resolve_reads_from_provider() {
        let backend = MemoryBackend::seeded();
        let gate = SessionGate::new(backend.connect());

        assert_eq!(gate.resolve().await.unwrap(), None);
        assert!(backend.calls().contains(&StoreCall::CurrentSession));
    }

    #[tokio::test]
    async fn pushed_sign_out_reaches_the_cache() {
        let backend = MemoryBackend::seeded();
        let store = backend.connect();
        let gate = SessionGate::new(store.clone());
        let _subscription = gate.subscribe();
        let route = gate.login("admin@pawscan.test", "pawscan-admin").await.unwrap();
        assert_eq!(route, Route::Admin);

        let mut watch = gate.watch();
        // Token revoked remotely; the store notices on its next check.
        backend.revoke(&gate.session().unwrap().access_token);
        store.current_session().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while watch.borrow_and_update().is_some() {
                watch.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(gate.guard(), Access::Redirect(Route::Login));
    }

    #[tokio::test]
    async fn dropped_subscription_stops_following_events() {
        let backend = MemoryBackend::seeded();
        let store = backend.connect();
        let gate = SessionGate::new(store.clone());

        let subscription = gate.subscribe();
        drop(subscription);
        tokio::task::yield_now().await;

        store.sign_in("admin@pawscan.test", "pawscan-admin").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gate.session().is_none());
    }
}
