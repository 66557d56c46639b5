//! The STRAND server: reactor loop, dispatch and background sweep.
//!
//! One task owns the socket and drives every inbound datagram through the
//! dispatch path; a second task sends queued responses; a third ticks the
//! periodic sweep (expired sessions, stale cookies, obsolete ICE records)
//! and retransmissions. Processing never blocks on socket I/O: responses
//! are built synchronously and handed to the send queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::core::config::ServerConfig;
use crate::core::constants::{EVENT_QUEUE_CAPACITY, SWEEP_INTERVAL};
use crate::core::error::ServerError;
use crate::core::hooks::{ConnectionPolicy, Decision, HandshakeEvent, SessionEvent};
use crate::crypto::Direction;
use crate::handshake::HandshakeEngine;
use crate::ice::{IceTable, Side};
use crate::session::{
    Session, SessionClass, SessionId, SessionInner, SessionRef, SessionRegistry, SessionState,
};
use crate::transport::frame::{self, Chunk, Datagram, HandshakePacket, PayloadHeader};
use crate::transport::socket::{SendQueue, StrandSocket};

/// Something the application wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A handshake completed and the session is live.
    SessionEstablished {
        /// The new session.
        session_id: SessionId,
        /// The peer's address at establishment.
        address: SocketAddr,
    },
    /// An ordered flow delivered a payload.
    FlowData {
        /// The session the flow belongs to.
        session_id: SessionId,
        /// The delivering flow.
        flow_id: u32,
        /// The payload, in sender order within its flow.
        payload: Vec<u8>,
    },
    /// A session was destroyed (peer close, server close or keepalive).
    SessionClosed {
        /// The destroyed session.
        session_id: SessionId,
    },
}

/// Shared state of a running server.
struct ServerCore {
    config: ServerConfig,
    registry: SessionRegistry,
    engine: HandshakeEngine,
    ice: IceTable,
    queue: SendQueue,
    events: mpsc::Sender<ServerEvent>,
}

impl ServerCore {
    fn emit(&self, event: ServerEvent) {
        if self.events.try_send(event).is_err() {
            debug!("event channel full, event dropped");
        }
    }

    /// Route one inbound datagram.
    fn on_datagram(&self, data: &[u8], from: SocketAddr) {
        match frame::parse_datagram(data) {
            Ok(Datagram::Handshake(HandshakePacket::Hello { tag, url, random })) => {
                self.engine
                    .on_hello(&tag, url, &random, from, &self.registry, &self.queue);
            }
            Ok(Datagram::Handshake(HandshakePacket::CookieAck {
                cookie,
                peer_public,
            })) => {
                self.engine
                    .on_cookie_ack(&cookie, &peer_public, from, &self.registry, &self.queue);
            }
            Ok(Datagram::Session {
                id,
                counter,
                ciphertext,
            }) => self.on_session_datagram(id, counter, ciphertext, from),
            Err(err) => debug!(peer = %from, %err, "undecodable datagram dropped"),
        }
    }

    /// Process one datagram addressed to an established session.
    fn on_session_datagram(&self, id: u32, counter: u64, ciphertext: &[u8], from: SocketAddr) {
        let Some(session) = self.registry.find(id) else {
            error!(session = id, peer = %from, "datagram for unknown session dropped");
            return;
        };

        let mut inner = session.lock();
        let Some(plaintext) = inner
            .cipher
            .as_ref()
            .and_then(|cipher| cipher.open(Direction::ToServer, counter, ciphertext))
        else {
            // Authentication failure: silent drop, no state change. Anything
            // else would hand the sender a validity oracle.
            debug!(session = %session.id(), peer = %from, "unauthenticated datagram dropped");
            return;
        };

        // A counter already accepted means a captured datagram played back:
        // drop it before it refreshes activity or elicits any reply.
        if !inner.replay.accept(counter) {
            debug!(session = %session.id(), peer = %from, counter, "replayed datagram dropped");
            return;
        }

        inner.touch();
        // An authenticated datagram from a new address moves the session.
        inner.peer_addr = from;

        let (header, chunks) = match frame::parse_payload(&plaintext) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(session = %session.id(), %err, "undecodable payload dropped");
                return;
            }
        };

        inner.clock.on_peer_timestamp(header.timestamp);
        if let Some(echo) = header.echo {
            let rtt = inner.clock.rtt_from_echo(echo);
            inner.estimator.sample(rtt);
        }

        let mut replies = Vec::new();
        let mut close_requested = false;
        for chunk in chunks {
            match chunk {
                Chunk::Ping => replies.push(Chunk::Pong),
                Chunk::Pong => {}
                Chunk::Data {
                    flow_id,
                    sequence,
                    payload,
                } => {
                    let delivered = inner.receiver(flow_id).on_fragment(sequence, payload);
                    let up_to = inner.receiver(flow_id).cumulative_ack();
                    replies.push(Chunk::Ack { flow_id, up_to });
                    for payload in delivered {
                        self.emit(ServerEvent::FlowData {
                            session_id: session.id(),
                            flow_id,
                            payload,
                        });
                    }
                }
                Chunk::Ack { flow_id, up_to } => {
                    let Some(writer) = inner.find_writer(flow_id) else {
                        error!(session = %session.id(), flow_id, "ack for unknown flow dropped");
                        continue;
                    };
                    writer.on_ack(up_to);
                }
                Chunk::FlowClose { flow_id } => {
                    inner.close_flow(flow_id);
                }
                Chunk::SessionClose => close_requested = true,
            }
        }

        if close_requested {
            inner.state = SessionState::Closing;
            drop(inner);
            self.destroy(id);
            return;
        }

        // Due retransmissions ride on inbound processing as well as on the
        // sweep tick.
        let now = Instant::now();
        let rto = inner.estimator.rto();
        for writer in inner.writers_mut() {
            replies.extend(writer.flush(now, rto));
        }

        if !replies.is_empty() {
            self.send_chunks(&session, &mut inner, &replies);
        }
    }

    /// Seal a run of chunks into one datagram and queue it to the peer.
    fn send_chunks(&self, session: &Session, inner: &mut SessionInner, chunks: &[Chunk]) {
        let header = PayloadHeader {
            timestamp: inner.clock.now(),
            echo: inner.clock.echo(),
        };
        let payload = frame::encode_payload(header, chunks);
        let counter = inner.next_send_counter();
        let Some(cipher) = inner.cipher.as_ref() else {
            return;
        };
        match cipher.seal(Direction::ToPeer, counter, &payload) {
            Ok(sealed) => {
                self.queue.enqueue(
                    inner.peer_addr,
                    frame::encode_session_datagram(session.id().value, counter, &sealed),
                );
            }
            Err(err) => error!(session = %session.id(), %err, "seal failed"),
        }
    }

    /// Flush every writer of a session whose (re)transmissions are due.
    fn flush_session(&self, session: &SessionRef) {
        let mut inner = session.lock();
        if inner.cipher.is_none() {
            return;
        }
        let now = Instant::now();
        let rto = inner.estimator.rto();
        let mut chunks = Vec::new();
        for writer in inner.writers_mut() {
            chunks.extend(writer.flush(now, rto));
        }
        if !chunks.is_empty() {
            self.send_chunks(session, &mut inner, &chunks);
        }
    }

    /// Periodic per-session upkeep: keepalive pings and due retransmissions.
    fn maintain(&self, session: &SessionRef, now: Instant) {
        let mut inner = session.lock();
        if inner.state != SessionState::Established {
            return;
        }

        let mut chunks = Vec::new();
        let idle = now.saturating_duration_since(inner.last_activity);
        if idle >= self.keepalive(session.class()) / 2 {
            chunks.push(Chunk::Ping);
        }

        let rto = inner.estimator.rto();
        for writer in inner.writers_mut() {
            chunks.extend(writer.flush(now, rto));
        }
        if !chunks.is_empty() {
            self.send_chunks(session, &mut inner, &chunks);
        }
    }

    fn keepalive(&self, class: SessionClass) -> std::time::Duration {
        match class {
            SessionClass::Peer => self.config.keepalive_peer,
            SessionClass::Server => self.config.keepalive_server,
        }
    }

    fn destroy(&self, value: u32) {
        if let Some(session) = self.registry.remove(value) {
            self.emit(ServerEvent::SessionClosed {
                session_id: session.id(),
            });
        }
    }

    /// One sweep tick: reclaim idle sessions, expired cookies and obsolete
    /// ICE records, then run per-session upkeep on the survivors.
    fn sweep(&self, now: Instant) {
        let live: Vec<SessionRef> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|session| session.state() != SessionState::Closed)
            .collect();

        self.registry.sweep(now);
        self.engine.sweep_cookies(now);
        self.ice.sweep(now);

        for session in &live {
            if session.state() == SessionState::Closed {
                self.emit(ServerEvent::SessionClosed {
                    session_id: session.id(),
                });
            } else {
                self.maintain(session, now);
            }
        }
    }
}

/// Forwards policy hooks to the application policy and mirrors session
/// commits onto the event channel.
struct EventingPolicy {
    inner: Arc<dyn ConnectionPolicy>,
    events: mpsc::Sender<ServerEvent>,
}

impl ConnectionPolicy for EventingPolicy {
    fn on_handshake(&self, event: &HandshakeEvent) -> Decision {
        self.inner.on_handshake(event)
    }

    fn on_session(&self, event: &SessionEvent) {
        self.inner.on_session(event);
        let forwarded = self.events.try_send(ServerEvent::SessionEstablished {
            session_id: event.session_id,
            address: event.address,
        });
        if forwarded.is_err() {
            debug!("event channel full, establishment event dropped");
        }
    }
}

/// A running STRAND server.
///
/// Dropping the handle leaves the background tasks running; call
/// [`shutdown`](StrandServer::shutdown) to stop them.
pub struct StrandServer {
    core: Arc<ServerCore>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl StrandServer {
    /// Bind on the configured port and start the server tasks.
    ///
    /// Returns the server handle and the event channel receiver.
    pub async fn bind(
        config: ServerConfig,
        policy: Arc<dyn ConnectionPolicy>,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        Self::bind_to(addr, config, policy).await
    }

    /// Bind on an explicit address and start the server tasks.
    pub async fn bind_to(
        addr: SocketAddr,
        config: ServerConfig,
        policy: Arc<dyn ConnectionPolicy>,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), ServerError> {
        let config = config.validated();
        let mut socket = StrandSocket::bind(addr)
            .await
            .map_err(|err| ServerError::BindFailed(err.to_string()))?;
        let local_addr = socket.local_addr()?;
        let (queue, sender_task) = socket.spawn_sender();

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let policy: Arc<dyn ConnectionPolicy> = Arc::new(EventingPolicy {
            inner: policy,
            events: events_tx.clone(),
        });

        let core = Arc::new(ServerCore {
            registry: SessionRegistry::new(&config),
            engine: HandshakeEngine::new(config.cookie_lifetime, policy),
            ice: IceTable::new(),
            queue,
            events: events_tx,
            config,
        });

        let reactor = tokio::spawn({
            let core = Arc::clone(&core);
            async move {
                loop {
                    match socket.recv_from().await {
                        Ok((data, from)) => core.on_datagram(data, from),
                        Err(err) => debug!(%err, "receive failed"),
                    }
                }
            }
        });

        let sweeper = tokio::spawn({
            let core = Arc::clone(&core);
            async move {
                let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    core.sweep(Instant::now());
                }
            }
        });

        info!(%local_addr, "server listening");
        Ok((
            Self {
                core,
                local_addr,
                tasks: vec![sender_task, reactor, sweeper],
            },
            events_rx,
        ))
    }

    /// The bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The session registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.core.registry
    }

    /// The ICE negotiation table.
    pub fn ice(&self) -> &IceTable {
        &self.core.ice
    }

    /// Queue a payload on one flow of a session and send what is due.
    ///
    /// Returns the assigned flow sequence number. Payloads queued on a
    /// still-pending session go out once the handshake commits.
    pub fn send(
        &self,
        session_id: u32,
        flow_id: u32,
        payload: Vec<u8>,
    ) -> Result<u64, ServerError> {
        let session = self
            .core
            .registry
            .find(session_id)
            .ok_or_else(|| ServerError::SessionError(format!("no live session {session_id}")))?;
        let sequence = session.lock().writer(flow_id).enqueue(payload);
        self.core.flush_session(&session);
        Ok(sequence)
    }

    /// Close one session, notifying the peer.
    pub fn close(&self, session_id: u32) {
        if let Some(session) = self.core.registry.find(session_id) {
            let mut inner = session.lock();
            inner.state = SessionState::Closing;
            self.core
                .send_chunks(&session, &mut inner, &[Chunk::SessionClose]);
        }
        self.core.destroy(session_id);
    }

    /// Apply one SDP candidate line to the negotiation of a peer pair.
    ///
    /// Returns `true` when the line parsed; unparseable lines are skipped.
    pub fn relay_candidate(
        &self,
        initiator: &str,
        remote: &str,
        side: Side,
        media_index: u16,
        line: &str,
    ) -> bool {
        self.core.ice.with_record(initiator, remote, |record| {
            record.set_current(side);
            record.set_media_index(media_index);
            record.from_sdp_line(line)
        })
    }

    /// Stop every background task. Live sessions are not notified.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        info!(local_addr = %self.local_addr, "server stopped");
    }
}

impl std::fmt::Debug for StrandServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrandServer")
            .field("local_addr", &self.local_addr)
            .field("sessions", &self.core.registry.len())
            .finish_non_exhaustive()
    }
}
