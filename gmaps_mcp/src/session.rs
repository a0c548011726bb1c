//! Session lifecycle and registry.
//!
//! A session is created only by a valid `initialize` request that carries
//! no session id, identified from then on by an opaque UUID the client
//! echoes in the `mcp-session-id` header. Each session exclusively owns
//! one [`SessionTransport`] (1:1) and an optional API-key override that is
//! refreshed whenever a request for that session carries a credential.
//!
//! The registry is shared mutable state across all concurrent requests; a
//! concurrent map keeps `create`/`lookup`/`update`/`remove` atomic with
//! respect to each other. Removal on transport closure is unconditional
//! and immediate so entries cannot leak.

use dashmap::{DashMap, Entry};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the per-session server→client event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

type CloseCallback = Box<dyn FnOnce(&str) + Send>;

/// Exclusive owner of one session's server→client event stream and
/// protocol state. Closing is idempotent and fires the registered
/// closure callback exactly once.
pub struct SessionTransport {
    session_id: String,
    events_tx: broadcast::Sender<String>,
    initialized: AtomicBool,
    closed: AtomicBool,
    on_close: Mutex<Option<CloseCallback>>,
}

impl SessionTransport {
    fn new(session_id: String) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session_id,
            events_tx,
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            on_close: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Subscribe to server→client events (the GET /mcp stream).
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events_tx.subscribe()
    }

    /// Push one event to every open stream for this session. Returns the
    /// receiver count; zero receivers is not an error.
    pub fn send_event(&self, payload: String) -> usize {
        self.events_tx.send(payload).unwrap_or(0)
    }

    /// The protocol handshake for this transport has completed.
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn set_on_close(&self, callback: CloseCallback) {
        *self.on_close.lock().expect("on_close lock poisoned") = Some(callback);
    }

    /// Close the transport. The first call fires the closure callback
    /// (which deregisters the session); later calls are no-ops.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let callback = self.on_close.lock().expect("on_close lock poisoned").take();
        if let Some(callback) = callback {
            callback(&self.session_id);
        }
        true
    }
}

/// One logical client connection: transport plus credential override.
pub struct Session {
    transport: SessionTransport,
    api_key_override: Mutex<Option<String>>,
}

impl Session {
    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    pub fn id(&self) -> &str {
        self.transport.session_id()
    }

    /// Stored key override, if any request for this session ever carried
    /// an explicit credential.
    pub fn api_key_override(&self) -> Option<String> {
        self.api_key_override
            .lock()
            .expect("api_key_override lock poisoned")
            .clone()
    }

    fn set_api_key(&self, key: String) {
        *self
            .api_key_override
            .lock()
            .expect("api_key_override lock poisoned") = Some(key);
    }
}

/// Owns the session-id → session mapping for one transport endpoint.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Allocate a fresh session with a unique id and register a closure
    /// callback that removes the entry when its transport closes.
    ///
    /// An id collision is practically unreachable in a v4 UUID space, but
    /// the loop regenerates rather than clobbering an existing entry.
    pub fn create_session(self: &Arc<Self>) -> Arc<Session> {
        loop {
            let session_id = Uuid::new_v4().to_string();
            let transport = SessionTransport::new(session_id.clone());

            let registry = Arc::downgrade(self);
            transport.set_on_close(Box::new(move |id| {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(id);
                }
            }));

            let session = Arc::new(Session {
                transport,
                api_key_override: Mutex::new(None),
            });

            match self.sessions.entry(session_id.clone()) {
                Entry::Occupied(_) => {
                    warn!(session_id = %session_id, "Session id collision, regenerating");
                    continue;
                }
                Entry::Vacant(entry) => {
                    entry.insert(session.clone());
                    info!(session_id = %session_id, "Session created");
                    return session;
                }
            }
        }
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    /// Idempotent overwrite of the session's stored key. Returns `false`
    /// for an unknown id.
    pub fn update_api_key(&self, session_id: &str, key: String) -> bool {
        match self.sessions.get(session_id) {
            Some(session) => {
                debug!(session_id = %session_id, "Refreshing session API key override");
                session.set_api_key(key);
                true
            }
            None => false,
        }
    }

    /// Remove a session and close its transport. Removing an absent id is
    /// a no-op, not an error.
    pub fn remove(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, session)) => {
                // Close after removal: the closure callback re-enters
                // remove() and must find the entry already gone.
                session.transport.close();
                info!(session_id = %session_id, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Shutdown path: remove every entry and close every transport.
    /// Individual closures never abort the remaining cleanups.
    pub fn close_all(&self) -> usize {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut closed = 0;
        for id in ids {
            if self.remove(&id) {
                closed += 1;
            } else {
                // Raced with a concurrent removal; nothing left to clean.
                debug!(session_id = %id, "Session already removed during close_all");
            }
        }
        info!(closed, "All sessions closed");
        closed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn create_session_assigns_distinct_ids() {
        let registry = Arc::new(SessionRegistry::new());
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let session = registry.create_session();
            assert!(seen.insert(session.id().to_string()), "duplicate session id");
        }
        assert_eq!(registry.len(), 256);
    }

    #[test]
    fn lookup_finds_live_sessions_only() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create_session();
        let id = session.id().to_string();

        assert!(registry.lookup(&id).is_some());
        assert!(registry.lookup("never-issued").is_none());
    }

    #[test]
    fn update_api_key_overwrites_idempotently() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create_session();
        let id = session.id().to_string();

        assert!(session.api_key_override().is_none());
        assert!(registry.update_api_key(&id, "k2".into()));
        assert_eq!(session.api_key_override().as_deref(), Some("k2"));

        // Overwrite, then repeat the same overwrite.
        assert!(registry.update_api_key(&id, "k1".into()));
        assert!(registry.update_api_key(&id, "k1".into()));
        assert_eq!(session.api_key_override().as_deref(), Some("k1"));

        assert!(!registry.update_api_key("missing", "k".into()));
    }

    #[test]
    fn remove_is_idempotent_and_closes_transport() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create_session();
        let id = session.id().to_string();

        assert!(registry.remove(&id));
        assert!(session.transport().is_closed());
        assert!(registry.lookup(&id).is_none());

        // Second removal is a no-op, not an error.
        assert!(!registry.remove(&id));
        assert!(!registry.remove("never-issued"));
    }

    #[test]
    fn transport_closure_deregisters_the_session() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create_session();
        let id = session.id().to_string();

        assert!(session.transport().close());
        assert!(registry.lookup(&id).is_none());

        // Close is idempotent as well.
        assert!(!session.transport().close());
    }

    #[test]
    fn close_all_drains_the_registry() {
        let registry = Arc::new(SessionRegistry::new());
        let sessions: Vec<_> = (0..8).map(|_| registry.create_session()).collect();

        assert_eq!(registry.close_all(), 8);
        assert!(registry.is_empty());
        for session in sessions {
            assert!(session.transport().is_closed());
        }

        // A second sweep has nothing to do.
        assert_eq!(registry.close_all(), 0);
    }

    #[test]
    fn send_event_without_subscribers_is_not_an_error() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create_session();
        assert_eq!(session.transport().send_event("{}".into()), 0);

        let _rx = session.transport().subscribe();
        assert_eq!(session.transport().send_event("{}".into()), 1);
    }
}
