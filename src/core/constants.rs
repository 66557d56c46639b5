//! Protocol constants.
//!
//! These values are fixed by the protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// ChaCha20-Poly1305 nonce size.
pub const AEAD_NONCE_SIZE: usize = 12;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 private key size.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Derived session key size.
pub const SESSION_KEY_SIZE: usize = 32;

/// Handshake tag size (echoed verbatim in every handshake response).
pub const TAG_SIZE: usize = 16;

/// Handshake cookie size. The first four bytes carry the provisional
/// session id, the remainder is drawn from a secure random source.
pub const COOKIE_SIZE: usize = 64;

/// Peer-supplied random bytes carried in the first handshake datagram.
pub const HELLO_RANDOM_SIZE: usize = 16;

/// Width of the sliding replay window over datagram counters.
pub const REPLAY_WINDOW_SIZE: u64 = 64;

// =============================================================================
// DATAGRAM TYPES
// =============================================================================

/// First-contact handshake request (tag + url + peer random).
pub const TYPE_HELLO: u8 = 0x30;

/// Cookie follow-up (cookie + peer key-agreement public key).
pub const TYPE_COOKIE_ACK: u8 = 0x38;

/// Handshake response carrying a cookie and the server certificate.
pub const TYPE_COOKIE: u8 = 0x70;

/// Handshake response carrying one or more redirection addresses.
pub const TYPE_REDIRECT: u8 = 0x71;

/// Session-commit acknowledgment (session id, fire-and-forget).
pub const TYPE_SESSION_OK: u8 = 0x78;

// =============================================================================
// CHUNK TYPES (inside a decrypted session payload)
// =============================================================================

/// Keepalive ping on the control flow.
pub const CHUNK_PING: u8 = 0x01;

/// Keepalive ping reply.
pub const CHUNK_PONG: u8 = 0x41;

/// Ordered flow data fragment.
pub const CHUNK_DATA: u8 = 0x10;

/// Cumulative flow acknowledgment.
pub const CHUNK_ACK: u8 = 0x11;

/// Peer-initiated flow close.
pub const CHUNK_FLOW_CLOSE: u8 = 0x5e;

/// Session close request.
pub const CHUNK_SESSION_CLOSE: u8 = 0x4c;

// =============================================================================
// FLOWS
// =============================================================================

/// Reserved id of the implicit control flow every session owns.
pub const CONTROL_FLOW_ID: u32 = 0;

/// Default flow-control window: unacknowledged fragments in flight per flow.
pub const DEFAULT_FLOW_WINDOW: usize = 64;

// =============================================================================
// TIMING
// =============================================================================

/// Retransmission timeout before any round-trip sample has been observed.
pub const RTO_INIT: Duration = Duration::from_millis(1000);

/// Default lower bound of the RTO band.
pub const RTO_MIN: Duration = Duration::from_millis(200);

/// Default upper bound of the RTO band.
pub const RTO_MAX: Duration = Duration::from_millis(10_000);

/// Floor applied to every configured keepalive interval.
pub const KEEPALIVE_FLOOR: Duration = Duration::from_secs(5);

/// Default keepalive timeout for peer-originated sessions.
pub const KEEPALIVE_PEER: Duration = Duration::from_secs(10);

/// Default keepalive timeout for server-originated sessions.
pub const KEEPALIVE_SERVER: Duration = Duration::from_secs(15);

/// Default freshness window of a handshake cookie.
pub const COOKIE_LIFETIME: Duration = Duration::from_secs(95);

/// An ICE record with no activity for this long is obsolete.
pub const ICE_OBSOLETE_AFTER: Duration = Duration::from_millis(120_000);

/// Interval of the background sweep task.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default UDP port.
pub const DEFAULT_PORT: u16 = 1935;

/// Receive buffer size for the reactor socket.
pub const RECV_BUFFER_SIZE: usize = 65535;

/// Capacity of the asynchronous send queue.
pub const SEND_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the server event channel.
pub const EVENT_QUEUE_CAPACITY: usize = 256;
