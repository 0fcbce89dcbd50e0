// One console per browser: its own store client, gate, and dashboard.
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::gate::{Access, SessionGate, SessionSubscription};
use crate::auth::session::generate_token;
use crate::dashboard::Dashboard;
use crate::store::{DynRemoteStore, StoreError};

/// Message shown once on the next render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub is_error: bool,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
        }
    }
}

pub struct Console {
    pub gate: SessionGate,
    pub dashboard: Dashboard,
    mounted: bool,
    notice: Option<Notice>,
    _subscription: SessionSubscription,
}

impl Console {
    /// Must be called inside the runtime: the session subscription is a task.
    pub fn new(store: DynRemoteStore) -> Self {
        let gate = SessionGate::new(store.clone());
        let subscription = gate.subscribe();
        Self {
            gate,
            dashboard: Dashboard::new(store),
            mounted: false,
            notice: None,
            _subscription: subscription,
        }
    }

    /// Gate the dashboard. The first time through, the session is re-checked
    /// with the provider and all collections are fetched. A failed check is
    /// returned so the login page can show it.
    pub async fn mount(&mut self) -> Result<Access, StoreError> {
        if !self.mounted {
            if let Err(e) = self.gate.resolve().await {
                tracing::error!("Error resolving session: {}", e);
                return Err(e);
            }
        }

        let access = self.gate.guard();
        if access == Access::Allow && !self.mounted {
            let report = self.dashboard.refresh_all().await;
            if !report.is_complete() {
                tracing::warn!(failed = ?report.failed, "dashboard mounted with stale collections");
            }
            self.mounted = true;
        }
        Ok(access)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn set_notice(&mut self, notice: Notice) {
        self.notice = Some(notice);
    }

    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }
}

pub type SharedConsole = Arc<Mutex<Console>>;

/// Live consoles keyed by cookie id. Oldest are dropped past capacity.
pub struct ConsoleRegistry {
    consoles: HashMap<String, SharedConsole>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ConsoleRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            consoles: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a console under a fresh id and return the id.
    pub fn insert(&mut self, console: Console) -> String {
        while self.consoles.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.consoles.remove(&oldest).is_some() {
                tracing::info!("Evicting idle console");
            }
        }

        let id = generate_token();
        self.consoles
            .insert(id.clone(), Arc::new(Mutex::new(console)));
        self.order.push_back(id.clone());
        id
    }

    pub fn get(&self, id: &str) -> Option<SharedConsole> {
        self.consoles.get(id).cloned()
    }

    pub fn remove(&mut self, id: &str) -> Option<SharedConsole> {
        self.order.retain(|existing| existing != id);
        self.consoles.remove(id)
    }

    pub fn len(&self) -> usize {
        self.consoles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consoles.is_empty()
    }
}
