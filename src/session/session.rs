//! Per-peer session state.
//!
//! A session owns its derived key material, its flow writers and receivers,
//! and the embedded round-trip estimator. All mutable state sits behind one
//! lock: decrypt of independent datagrams may run in parallel, but applying
//! decoded results to a session is serialized.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::core::constants::CONTROL_FLOW_ID;
use crate::crypto::{PacketCipher, ReplayWindow};
use crate::transport::timing::{PingEstimator, TimestampClock};

use super::flow::{FlowReceiver, FlowWriter};

/// A session identifier: the 32-bit wire id plus a generation counter.
///
/// The wire only carries `value`; the generation lets a holder of a stale
/// reference to a destroyed-and-reused id be detected instead of silently
/// misapplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    /// The 32-bit id carried on the wire. Never 0 for a live session.
    pub value: u32,
    /// Monotonically increasing allocation counter.
    pub generation: u64,
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.value, self.generation)
    }
}

/// Who originated the session; selects its keepalive class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionClass {
    /// Peer-originated (inbound handshake).
    Peer,
    /// Server-originated (outbound dial).
    Server,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created in the registry, cookie issued, key material not yet derived.
    Pending,
    /// Handshake complete, traffic flowing.
    Established,
    /// Close requested, draining.
    Closing,
    /// Destroyed; any remaining reference is stale.
    Closed,
}

/// One live session. Shared as `Arc<Session>`.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    class: SessionClass,
    inner: Mutex<SessionInner>,
}

/// The lock-protected mutable state of a session.
#[derive(Debug)]
pub struct SessionInner {
    /// Lifecycle state.
    pub state: SessionState,
    /// The peer's current network address.
    pub peer_addr: SocketAddr,
    /// Derived packet cipher; `None` while the handshake is pending.
    pub cipher: Option<PacketCipher>,
    /// Replay guard over authenticated inbound datagram counters.
    pub replay: ReplayWindow,
    /// Last time an authenticated datagram was applied.
    pub last_activity: Instant,
    /// Embedded round-trip estimator.
    pub estimator: PingEstimator,
    /// Timestamp clock for round-trip measurement.
    pub clock: TimestampClock,
    /// Outbound datagram counter (AEAD nonce material).
    pub send_counter: u64,
    writers: HashMap<u32, FlowWriter>,
    receivers: HashMap<u32, FlowReceiver>,
}

impl Session {
    /// Create a pending session. The control writer (flow id 0) exists from
    /// the start.
    pub fn new(
        id: SessionId,
        class: SessionClass,
        peer_addr: SocketAddr,
        estimator: PingEstimator,
    ) -> Self {
        let mut writers = HashMap::new();
        writers.insert(CONTROL_FLOW_ID, FlowWriter::new(CONTROL_FLOW_ID));
        Self {
            id,
            class,
            inner: Mutex::new(SessionInner {
                state: SessionState::Pending,
                peer_addr,
                cipher: None,
                replay: ReplayWindow::new(),
                last_activity: Instant::now(),
                estimator,
                clock: TimestampClock::new(),
                send_counter: 0,
                writers,
                receivers: HashMap::new(),
            }),
        }
    }

    /// The session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The keepalive class.
    pub fn class(&self) -> SessionClass {
        self.class
    }

    /// Serialize access to the mutable state.
    pub fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Time since the last applied authenticated datagram.
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.lock().last_activity)
    }
}

impl SessionInner {
    /// Commit the handshake: install the cipher and mark established.
    pub fn establish(&mut self, cipher: PacketCipher) {
        self.cipher = Some(cipher);
        self.state = SessionState::Established;
        self.last_activity = Instant::now();
    }

    /// Record activity.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Find-or-create the writer for a flow id.
    pub fn writer(&mut self, flow_id: u32) -> &mut FlowWriter {
        self.writers
            .entry(flow_id)
            .or_insert_with(|| FlowWriter::new(flow_id))
    }

    /// Find-or-create the receiver for a flow id.
    pub fn receiver(&mut self, flow_id: u32) -> &mut FlowReceiver {
        self.receivers
            .entry(flow_id)
            .or_insert_with(|| FlowReceiver::new(flow_id))
    }

    /// Look up an existing writer without creating one.
    pub fn find_writer(&mut self, flow_id: u32) -> Option<&mut FlowWriter> {
        self.writers.get_mut(&flow_id)
    }

    /// Remove one flow on explicit peer close. The control flow is never
    /// removed individually; it dies with the session.
    pub fn close_flow(&mut self, flow_id: u32) -> bool {
        if flow_id == CONTROL_FLOW_ID {
            return false;
        }
        let had_writer = self.writers.remove(&flow_id).is_some();
        let had_receiver = self.receivers.remove(&flow_id).is_some();
        had_writer || had_receiver
    }

    /// Iterate all writers (control flow included) for flushing.
    pub fn writers_mut(&mut self) -> impl Iterator<Item = &mut FlowWriter> {
        self.writers.values_mut()
    }

    /// Number of live writers, control flow included.
    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    /// Drop every flow; called when the session is destroyed.
    pub fn clear_flows(&mut self) {
        self.writers.clear();
        self.receivers.clear();
    }

    /// Take the next outbound datagram counter.
    pub fn next_send_counter(&mut self) -> u64 {
        let counter = self.send_counter;
        self.send_counter += 1;
        counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            SessionId {
                value: 7,
                generation: 1,
            },
            SessionClass::Peer,
            "127.0.0.1:5000".parse().unwrap(),
            PingEstimator::new(),
        )
    }

    #[test]
    fn test_control_flow_exists_from_start() {
        let session = session();
        let mut inner = session.lock();
        assert_eq!(inner.writer_count(), 1);
        assert!(inner.find_writer(CONTROL_FLOW_ID).is_some());
    }

    #[test]
    fn test_writer_created_lazily() {
        let session = session();
        let mut inner = session.lock();
        assert!(inner.find_writer(5).is_none());
        inner.writer(5).enqueue(b"x".to_vec());
        assert!(inner.find_writer(5).is_some());
        assert_eq!(inner.writer_count(), 2);
    }

    #[test]
    fn test_control_flow_not_individually_closable() {
        let session = session();
        let mut inner = session.lock();
        assert!(!inner.close_flow(CONTROL_FLOW_ID));
        inner.writer(5);
        assert!(inner.close_flow(5));
        assert!(inner.find_writer(5).is_none());
    }

    #[test]
    fn test_establish_transitions_state() {
        let session = session();
        assert_eq!(session.state(), SessionState::Pending);
        {
            let mut inner = session.lock();
            let key = crate::crypto::SessionKey::from_bytes([1u8; 32]);
            inner.establish(PacketCipher::new(7, &key));
        }
        assert_eq!(session.state(), SessionState::Established);
    }

    #[test]
    fn test_send_counter_increments() {
        let session = session();
        let mut inner = session.lock();
        assert_eq!(inner.next_send_counter(), 0);
        assert_eq!(inner.next_send_counter(), 1);
    }
}
