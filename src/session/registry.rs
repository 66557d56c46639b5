//! The session registry: single source of truth for id -> session.
//!
//! Ids are unique among live sessions and never reused while a live entry
//! holds them; every allocation carries a fresh generation so stale handles
//! are detectable. Mutating operations are serialized through one lock;
//! lookups hand out `Arc` references and per-session state stays behind the
//! session's own lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::core::config::ServerConfig;
use crate::transport::timing::PingEstimator;

use super::session::{Session, SessionClass, SessionId, SessionState};

/// Shared reference to a live session.
pub type SessionRef = Arc<Session>;

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<u32, SessionRef>,
    next_value: u32,
    next_generation: u64,
}

/// Owns the table of live sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    keepalive_peer: Duration,
    keepalive_server: Duration,
    rto_min: Duration,
    rto_max: Duration,
}

impl SessionRegistry {
    /// Create a registry with the given configuration.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            keepalive_peer: config.keepalive_peer,
            keepalive_server: config.keepalive_server,
            rto_min: config.rto_min,
            rto_max: config.rto_max,
        }
    }

    /// Allocate a fresh id and insert a new pending session.
    ///
    /// The returned id is never shared with any other live session.
    pub fn create(&self, class: SessionClass, peer_addr: SocketAddr) -> SessionRef {
        let mut inner = self.lock();

        // Skip 0 (reserved for handshake traffic) and occupied values.
        loop {
            inner.next_value = inner.next_value.wrapping_add(1);
            let value = inner.next_value;
            if value == 0 || inner.sessions.contains_key(&value) {
                continue;
            }
            inner.next_generation += 1;
            let id = SessionId {
                value,
                generation: inner.next_generation,
            };
            let session = Arc::new(Session::new(
                id,
                class,
                peer_addr,
                PingEstimator::with_band(self.rto_min, self.rto_max),
            ));
            inner.sessions.insert(value, Arc::clone(&session));
            debug!(session = %id, ?class, peer = %peer_addr, "session created");
            return session;
        }
    }

    /// Look up a live session by wire id.
    ///
    /// Unknown, closed and keepalive-expired ids are all answered with
    /// `None` — the caller cannot distinguish which, so probing ids reveals
    /// nothing.
    pub fn find(&self, value: u32) -> Option<SessionRef> {
        let session = self.lock().sessions.get(&value).cloned()?;
        let state = session.state();
        if state == SessionState::Closed {
            return None;
        }
        if session.idle(Instant::now()) >= self.keepalive(session.class()) {
            return None;
        }
        Some(session)
    }

    /// Resolve a full id, rejecting stale generations.
    ///
    /// A handle minted before the id's slot was destroyed and reused fails
    /// here instead of being silently applied to the new session.
    pub fn resolve(&self, id: SessionId) -> Option<SessionRef> {
        let session = self.find(id.value)?;
        (session.id().generation == id.generation).then_some(session)
    }

    /// Snapshot of every live session reference.
    ///
    /// The returned list is a moment-in-time copy; sessions created or
    /// removed afterwards are not reflected.
    pub fn snapshot(&self) -> Vec<SessionRef> {
        self.lock().sessions.values().cloned().collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Whether the registry holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    /// Remove one session, cascading to all of its flows.
    pub fn remove(&self, value: u32) -> Option<SessionRef> {
        let session = self.lock().sessions.remove(&value)?;
        let mut state = session.lock();
        state.state = SessionState::Closed;
        state.clear_flows();
        drop(state);
        info!(session = %session.id(), "session destroyed");
        Some(session)
    }

    /// Remove every session idle past its class keepalive threshold.
    ///
    /// Idempotent and safe to run concurrently with traffic: a session that
    /// was touched after the idle check simply survives to the next sweep.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<u32> = {
            let inner = self.lock();
            inner
                .sessions
                .values()
                .filter(|session| {
                    session.idle(now) >= self.keepalive(session.class())
                        || session.state() == SessionState::Closed
                })
                .map(|session| session.id().value)
                .collect()
        };

        let mut removed = 0;
        for value in expired {
            if self.remove(value).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "keepalive sweep");
        }
        removed
    }

    fn keepalive(&self, class: SessionClass) -> Duration {
        match class {
            SessionClass::Peer => self.keepalive_peer,
            SessionClass::Server => self.keepalive_server,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
