//! Connection registries: live sessions grouped by resolved route key.
//!
//! # Responsibilities
//! - Own the id → session index and the cached key list / online count
//! - Broadcast and targeted send, targeted close, iteration, lookup
//! - Forward open/message/close/error to the application's listener
//! - Lazy, once-only creation per key via [`ConnectionHub`]
//!
//! # Design Decisions
//! - Index mutation and cache refresh happen under one lock, so the cache is
//!   never observed stale once `send`/`close` return
//! - Listener callbacks run with the lock released; a callback may call back
//!   into the registry
//! - Sessions are closed by command; the socket task detaches itself

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use dashmap::DashMap;
use serde::Serialize;

use crate::error::SessionError;
use crate::observability::errors::ErrorLog;
use crate::observability::events::{LifecycleEvent, Notifier};
use crate::observability::metrics::{ResponseStat, Stats};
use crate::websocket::frame::Payload;
use crate::websocket::session::SessionHandle;

/// Application callbacks for one connection registry.
///
/// Every method has an empty default; implement the ones you need.
pub trait SocketListener: Send + Sync {
    fn on_open(&self, _registry: &ConnectionRegistry, _client: &SessionHandle) {}

    fn on_message(&self, _registry: &ConnectionRegistry, _client: &SessionHandle, _message: Payload) {}

    fn on_close(&self, _registry: &ConnectionRegistry, _client: &SessionHandle) {}

    fn on_error(
        &self,
        _registry: &ConnectionRegistry,
        _error: &SessionError,
        _client: Option<&SessionHandle>,
    ) {
    }

    fn on_send(
        &self,
        _registry: &ConnectionRegistry,
        _message: &Payload,
        _ids: Option<&[String]>,
        _blacklist: &[String],
    ) {
    }

    fn on_destroy(&self, _registry: &ConnectionRegistry) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl SocketListener for NoopListener {}

type RegistryMap = DashMap<String, Arc<ConnectionRegistry>>;

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, SessionHandle>,
    keys: Vec<String>,
    online: usize,
}

impl RegistryState {
    fn refresh(&mut self) {
        let sessions = &self.sessions;
        self.keys.retain(|id| sessions.contains_key(id));
        for id in self.sessions.keys() {
            if !self.keys.contains(id) {
                self.keys.push(id.clone());
            }
        }
        self.online = self.keys.len();
    }

    fn targets(&self, ids: Option<&[String]>, blacklist: &[String]) -> Vec<SessionHandle> {
        self.keys
            .iter()
            .filter(|id| match ids {
                Some(ids) if !ids.is_empty() => ids.contains(id),
                _ => !blacklist.contains(id),
            })
            .filter_map(|id| self.sessions.get(id).cloned())
            .collect()
    }
}

/// All live sessions sharing one resolved route key.
pub struct ConnectionRegistry {
    key: String,
    name: String,
    path: String,
    state: Mutex<RegistryState>,
    listener: OnceLock<Arc<dyn SocketListener>>,
    repository: DashMap<String, serde_json::Value>,
    hub: Weak<RegistryMap>,
    stats: Arc<Stats>,
    errors: Arc<ErrorLog>,
    notifier: Notifier,
}

impl ConnectionRegistry {
    fn new(
        key: String,
        name: String,
        path: String,
        hub: Weak<RegistryMap>,
        stats: Arc<Stats>,
        errors: Arc<ErrorLog>,
        notifier: Notifier,
    ) -> Self {
        Self {
            key,
            name,
            path,
            state: Mutex::new(RegistryState::default()),
            listener: OnceLock::new(),
            repository: DashMap::new(),
            hub,
            stats,
            errors,
            notifier,
        }
    }

    /// Resolved route key: path with trailing slash, plus `#flag-flag` when flagged.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Name of the route that created this registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Shared key/value storage for the application.
    pub fn repository(&self) -> &DashMap<String, serde_json::Value> {
        &self.repository
    }

    pub fn online(&self) -> usize {
        self.state.lock().expect("registry lock poisoned").online
    }

    /// Snapshot of connected ids.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().expect("registry lock poisoned").keys.clone()
    }

    /// Run `init` once and keep its listener; later calls reuse it.
    pub fn initialize<F>(&self, init: F) -> Arc<dyn SocketListener>
    where
        F: FnOnce() -> Arc<dyn SocketListener>,
    {
        Arc::clone(self.listener.get_or_init(init))
    }

    pub fn is_initialized(&self) -> bool {
        self.listener.get().is_some()
    }

    fn listener(&self) -> Option<&Arc<dyn SocketListener>> {
        self.listener.get()
    }

    /// Send to every session except `blacklist`, or only to `ids` when given.
    ///
    /// Returns the number of sessions the message was queued for.
    pub fn send(
        &self,
        message: impl Into<Payload>,
        ids: Option<&[String]>,
        blacklist: &[String],
    ) -> usize {
        let message = message.into();
        let targets = self
            .state
            .lock()
            .expect("registry lock poisoned")
            .targets(ids, blacklist);

        let mut sent = 0;
        for session in &targets {
            if session.send(message.clone()) {
                self.stats.response(ResponseStat::Websocket);
                sent += 1;
            }
        }

        let ids = ids.filter(|ids| !ids.is_empty());
        let blacklist: &[String] = if ids.is_some() { blacklist } else { &[] };
        if let Some(listener) = self.listener() {
            listener.on_send(self, &message, ids, blacklist);
        }
        self.notifier.notify(LifecycleEvent::WebSocketSend {
            key: &self.key,
            recipients: sent,
        });

        sent
    }

    /// Send to every session.
    pub fn broadcast(&self, message: impl Into<Payload>) -> usize {
        self.send(message, None, &[])
    }

    /// Close every session, or only `ids` when given.
    ///
    /// Targets leave the index immediately; the cache is refreshed once.
    pub fn close(&self, ids: Option<&[String]>) -> usize {
        let mut state = self.state.lock().expect("registry lock poisoned");
        let targets = state.targets(ids, &[]);
        for session in &targets {
            session.close();
            state.sessions.remove(session.id());
        }
        state.refresh();
        targets.len()
    }

    /// Visit sessions in key order until `visit` returns `true`.
    pub fn all<F>(&self, mut visit: F)
    where
        F: FnMut(&SessionHandle, usize) -> bool,
    {
        let targets = self
            .state
            .lock()
            .expect("registry lock poisoned")
            .targets(None, &[]);
        for (index, session) in targets.iter().enumerate() {
            if visit(session, index) {
                break;
            }
        }
    }

    pub fn find(&self, id: &str) -> Option<SessionHandle> {
        self.state
            .lock()
            .expect("registry lock poisoned")
            .sessions
            .get(id)
            .cloned()
    }

    /// Report an application error against this registry.
    pub fn error(&self, error: impl std::fmt::Display) {
        self.errors.report(&self.name, Some(&self.path), &error);
    }

    /// Close everything and remove this registry from the hub.
    pub fn destroy(&self) {
        self.close(None);
        if let Some(hub) = self.hub.upgrade() {
            hub.remove_if(&self.key, |_, existing| std::ptr::eq(existing.as_ref(), self));
        }
        if let Some(listener) = self.listener() {
            listener.on_destroy(self);
        }
        tracing::debug!(key = %self.key, "Connection registry destroyed");
    }

    pub(crate) fn attach(&self, session: &SessionHandle) {
        {
            let mut state = self.state.lock().expect("registry lock poisoned");
            state.sessions.insert(session.id().to_string(), session.clone());
            state.refresh();
        }
        self.notifier.notify(LifecycleEvent::WebSocketOpen {
            key: &self.key,
            id: session.id(),
        });
        if let Some(listener) = self.listener() {
            listener.on_open(self, session);
        }
    }

    /// Remove a session whose socket went away. Runs its effects once.
    pub(crate) fn detach(&self, session: &SessionHandle) {
        if !session.mark_detached() {
            return;
        }
        {
            let mut state = self.state.lock().expect("registry lock poisoned");
            state.sessions.remove(session.id());
            state.refresh();
        }
        if let Some(listener) = self.listener() {
            listener.on_close(self, session);
        }
        self.notifier.notify(LifecycleEvent::WebSocketClose {
            key: &self.key,
            id: session.id(),
        });
    }

    pub(crate) fn deliver(&self, session: &SessionHandle, message: Payload) {
        if let Some(listener) = self.listener() {
            listener.on_message(self, session, message);
        }
    }

    pub(crate) fn report(&self, error: &SessionError, session: Option<&SessionHandle>) {
        let message = error.to_string();
        self.notifier.notify(LifecycleEvent::WebSocketError {
            key: &self.key,
            id: session.map(SessionHandle::id),
            error: &message,
        });
        if let Some(listener) = self.listener() {
            listener.on_error(self, error, session);
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("key", &self.key)
            .field("online", &self.online())
            .finish()
    }
}

/// Online count of one registry, for usage reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryUsage {
    pub key: String,
    pub online: usize,
}

/// Every live connection registry, keyed by resolved route key.
#[derive(Clone)]
pub struct ConnectionHub {
    map: Arc<RegistryMap>,
    stats: Arc<Stats>,
    errors: Arc<ErrorLog>,
    notifier: Notifier,
}

impl ConnectionHub {
    pub fn new(stats: Arc<Stats>, errors: Arc<ErrorLog>, notifier: Notifier) -> Self {
        Self {
            map: Arc::new(DashMap::new()),
            stats,
            errors,
            notifier,
        }
    }

    /// Existing registry for `key`, or a fresh one inserted atomically.
    ///
    /// Returns the registry and whether this call created it.
    pub fn get_or_create(&self, key: &str, name: &str, path: &str) -> (Arc<ConnectionRegistry>, bool) {
        use dashmap::mapref::entry::Entry;

        match self.map.entry(key.to_string()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let registry = Arc::new(ConnectionRegistry::new(
                    key.to_string(),
                    name.to_string(),
                    path.to_string(),
                    Arc::downgrade(&self.map),
                    Arc::clone(&self.stats),
                    Arc::clone(&self.errors),
                    self.notifier.clone(),
                ));
                entry.insert(Arc::clone(&registry));
                tracing::debug!(key = %key, "Connection registry created");
                (registry, true)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<ConnectionRegistry>> {
        self.map.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn usage(&self) -> Vec<RegistryUsage> {
        let mut usage: Vec<RegistryUsage> = self
            .map
            .iter()
            .map(|entry| RegistryUsage {
                key: entry.key().clone(),
                online: entry.value().online(),
            })
            .collect();
        usage.sort_by(|a, b| a.key.cmp(&b.key));
        usage
    }
}

/// Key for a resolved path and the matched route's flags.
pub fn registry_key(path: &str, flags: &[String]) -> String {
    let path = crate::routing::matcher::with_trailing_slash(path);
    if flags.is_empty() {
        path
    } else {
        format!("{}#{}", path, flags.join("-"))
    }
}
