//! Per-session routing of agent notifications and permission requests
//!
//! One agent process serves many sessions. Its reader task hands every
//! `session/update` and `session/request_permission` to the router, which
//! looks up whoever registered for that `(agent, session)` pair.
//!
//! Registration returns a [`Detach`] handle. Detaching removes exactly the
//! entry it was created for, so a stale handle can never unregister a newer
//! listener for the same session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::types::identifiers::{AgentId, SessionId};
use crate::types::permissions::{PermissionOutcome, RequestPermissionParams};
use crate::types::updates::SessionNotification;

/// Event delivered to a session listener
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A `session/update` notification for the session
    Update(SessionNotification),
    /// The session's routes were torn down (agent exit, release, clear)
    Closed {
        /// Session that closed
        session_id: SessionId,
        /// Human readable cause
        reason: String,
    },
}

/// Callback receiving a session's events
pub type NotificationHandler = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Callback answering a session's permission requests
pub type PermissionResolver =
    Arc<dyn Fn(RequestPermissionParams) -> BoxFuture<'static, PermissionOutcome> + Send + Sync>;

type RouteKey = (AgentId, SessionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteKind {
    Listener,
    Resolver,
}

struct Entry<T> {
    id: u64,
    value: T,
}

/// Registry of session listeners and permission resolvers
#[derive(Default)]
pub struct SessionRouter {
    next_entry: AtomicU64,
    listeners: Mutex<HashMap<RouteKey, Vec<Entry<NotificationHandler>>>>,
    resolvers: Mutex<HashMap<RouteKey, Vec<Entry<PermissionResolver>>>>,
}

impl SessionRouter {
    /// Create an empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one session
    pub fn register_listener(
        self: &Arc<Self>,
        agent_id: &AgentId,
        session_id: &SessionId,
        handler: NotificationHandler,
    ) -> Detach {
        let key = (agent_id.clone(), session_id.clone());
        let id = self.next_entry.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(key.clone())
            .or_default()
            .push(Entry { id, value: handler });
        Detach::new(self, RouteKind::Listener, key, id)
    }

    /// Register a permission resolver for one session
    pub fn register_resolver(
        self: &Arc<Self>,
        agent_id: &AgentId,
        session_id: &SessionId,
        resolver: PermissionResolver,
    ) -> Detach {
        let key = (agent_id.clone(), session_id.clone());
        let id = self.next_entry.fetch_add(1, Ordering::Relaxed);
        self.resolvers
            .lock()
            .entry(key.clone())
            .or_default()
            .push(Entry {
                id,
                value: resolver,
            });
        Detach::new(self, RouteKind::Resolver, key, id)
    }

    /// Deliver a notification to the listeners of its session
    ///
    /// Returns `false` if nobody is listening. Handlers run outside the
    /// registry lock.
    pub fn dispatch(&self, agent_id: &AgentId, notification: SessionNotification) -> bool {
        let key = (agent_id.clone(), notification.session_id.clone());
        let handlers: Vec<NotificationHandler> = self
            .listeners
            .lock()
            .get(&key)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.value)).collect())
            .unwrap_or_default();

        let Some((last, rest)) = handlers.split_last() else {
            return false;
        };
        for handler in rest {
            handler(SessionEvent::Update(notification.clone()));
        }
        last(SessionEvent::Update(notification));
        true
    }

    /// Most recently registered resolver for a session
    #[must_use]
    pub fn resolver(&self, agent_id: &AgentId, session_id: &SessionId) -> Option<PermissionResolver> {
        let key = (agent_id.clone(), session_id.clone());
        self.resolvers
            .lock()
            .get(&key)
            .and_then(|entries| entries.last())
            .map(|e| Arc::clone(&e.value))
    }

    /// Number of listeners registered for a session
    #[must_use]
    pub fn listener_count(&self, agent_id: &AgentId, session_id: &SessionId) -> usize {
        let key = (agent_id.clone(), session_id.clone());
        self.listeners.lock().get(&key).map_or(0, Vec::len)
    }

    /// Number of resolvers registered for a session
    #[must_use]
    pub fn resolver_count(&self, agent_id: &AgentId, session_id: &SessionId) -> usize {
        let key = (agent_id.clone(), session_id.clone());
        self.resolvers.lock().get(&key).map_or(0, Vec::len)
    }

    /// Whether no routes are registered at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty() && self.resolvers.lock().is_empty()
    }

    /// Drop every route of one session, telling its listeners why
    pub fn clear_session(&self, agent_id: &AgentId, session_id: &SessionId, reason: &str) {
        let key = (agent_id.clone(), session_id.clone());
        self.resolvers.lock().remove(&key);
        let removed = self.listeners.lock().remove(&key);
        if let Some(entries) = removed {
            notify_closed(session_id, entries, reason);
        }
    }

    /// Drop every route of one agent, returning the affected sessions
    pub fn clear_agent(&self, agent_id: &AgentId, reason: &str) -> Vec<SessionId> {
        self.clear_matching(|(agent, _)| agent == agent_id, reason)
    }

    /// Drop every route
    pub fn clear_all(&self, reason: &str) -> Vec<SessionId> {
        self.clear_matching(|_| true, reason)
    }

    fn clear_matching(&self, matches: impl Fn(&RouteKey) -> bool, reason: &str) -> Vec<SessionId> {
        self.resolvers.lock().retain(|key, _| !matches(key));

        let removed: Vec<(RouteKey, Vec<Entry<NotificationHandler>>)> = {
            let mut listeners = self.listeners.lock();
            let keys: Vec<RouteKey> = listeners.keys().filter(|k| matches(k)).cloned().collect();
            keys.into_iter()
                .filter_map(|key| listeners.remove(&key).map(|entries| (key, entries)))
                .collect()
        };

        removed
            .into_iter()
            .map(|((_, session_id), entries)| {
                notify_closed(&session_id, entries, reason);
                session_id
            })
            .collect()
    }

    fn remove(&self, kind: RouteKind, key: &RouteKey, id: u64) -> bool {
        fn remove_entry<T>(map: &mut HashMap<RouteKey, Vec<Entry<T>>>, key: &RouteKey, id: u64) -> bool {
            let Some(entries) = map.get_mut(key) else {
                return false;
            };
            let before = entries.len();
            entries.retain(|e| e.id != id);
            let removed = entries.len() != before;
            if entries.is_empty() {
                map.remove(key);
            }
            removed
        }

        match kind {
            RouteKind::Listener => remove_entry(&mut self.listeners.lock(), key, id),
            RouteKind::Resolver => remove_entry(&mut self.resolvers.lock(), key, id),
        }
    }
}

fn notify_closed(session_id: &SessionId, entries: Vec<Entry<NotificationHandler>>, reason: &str) {
    for entry in entries {
        (entry.value)(SessionEvent::Closed {
            session_id: session_id.clone(),
            reason: reason.to_string(),
        });
    }
}

impl std::fmt::Debug for SessionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRouter")
            .field("listeners", &self.listeners.lock().len())
            .field("resolvers", &self.resolvers.lock().len())
            .finish()
    }
}

// ============================================================================
// Detach handle
// ============================================================================

/// Handle that removes one registered route
///
/// Detaching is idempotent. Dropping the handle does not detach.
pub struct Detach {
    router: Weak<SessionRouter>,
    kind: RouteKind,
    key: RouteKey,
    entry: u64,
    detached: AtomicBool,
}

impl Detach {
    fn new(router: &Arc<SessionRouter>, kind: RouteKind, key: RouteKey, entry: u64) -> Self {
        Self {
            router: Arc::downgrade(router),
            kind,
            key,
            entry,
            detached: AtomicBool::new(false),
        }
    }

    /// Remove the route this handle was created for
    ///
    /// Returns `true` if the entry was still registered.
    pub fn detach(&self) -> bool {
        if self.detached.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.router
            .upgrade()
            .is_some_and(|router| router.remove(self.kind, &self.key, self.entry))
    }

    /// Whether [`detach`](Self::detach) has been called
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Detach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detach")
            .field("kind", &self.kind)
            .field("agent_id", &self.key.0)
            .field("session_id", &self.key.1)
            .field("detached", &self.is_detached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::updates::{ContentChunk, SessionUpdate};
    use futures::FutureExt;

    fn notification(session: &str) -> SessionNotification {
        SessionNotification {
            session_id: SessionId::new(session),
            update: SessionUpdate::AgentMessageChunk(ContentChunk::text("hi")),
        }
    }

    fn counting_handler() -> (NotificationHandler, Arc<Mutex<Vec<SessionEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: NotificationHandler = Arc::new(move |event| sink.lock().push(event));
        (handler, seen)
    }

    #[test]
    fn dispatch_reaches_only_matching_session() {
        let router = Arc::new(SessionRouter::new());
        let agent = AgentId::new("a");
        let (handler, seen) = counting_handler();
        let _detach = router.register_listener(&agent, &SessionId::new("s1"), handler);

        assert!(router.dispatch(&agent, notification("s1")));
        assert!(!router.dispatch(&agent, notification("s2")));
        assert!(!router.dispatch(&AgentId::new("b"), notification("s1")));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn stale_detach_leaves_newer_entry() {
        let router = Arc::new(SessionRouter::new());
        let agent = AgentId::new("a");
        let session = SessionId::new("s1");

        let (old, _) = counting_handler();
        let (new, seen) = counting_handler();
        let old_detach = router.register_listener(&agent, &session, old);
        old_detach.detach();
        let _new_detach = router.register_listener(&agent, &session, new);

        // A second detach of the stale handle must not touch the new entry
        assert!(!old_detach.detach());
        assert_eq!(router.listener_count(&agent, &session), 1);
        assert!(router.dispatch(&agent, notification("s1")));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn clear_agent_notifies_listeners_and_removes_resolvers() {
        let router = Arc::new(SessionRouter::new());
        let agent = AgentId::new("a");
        let session = SessionId::new("s1");
        let (handler, seen) = counting_handler();
        let _l = router.register_listener(&agent, &session, handler);
        let resolver: PermissionResolver = Arc::new(|_: RequestPermissionParams| {
            async { PermissionOutcome::Cancelled }.boxed()
        });
        let _r = router.register_resolver(&agent, &session, resolver);

        let sessions = router.clear_agent(&agent, "agent exited");
        assert_eq!(sessions, vec![session.clone()]);
        assert!(router.is_empty());
        assert!(router.resolver(&agent, &session).is_none());
        assert_eq!(
            seen.lock().as_slice(),
            &[SessionEvent::Closed {
                session_id: session,
                reason: "agent exited".to_string()
            }]
        );
    }

    #[test]
    fn detach_after_router_dropped_is_harmless() {
        let router = Arc::new(SessionRouter::new());
        let (handler, _) = counting_handler();
        let detach = router.register_listener(&AgentId::new("a"), &SessionId::new("s"), handler);
        drop(router);
        assert!(!detach.detach());
        assert!(detach.is_detached());
    }
}
