//! Policy hooks dispatched by the handshake engine.
//!
//! The engine consults a [`ConnectionPolicy`] for every first-contact
//! datagram and notifies it once a session is committed. Dispatch is
//! synchronous, on the processing path.

use std::net::SocketAddr;

use crate::session::SessionId;

/// A provisional peer identity built from a first-contact datagram.
#[derive(Debug, Clone)]
pub struct HandshakeEvent {
    /// The requester's observed network address.
    pub address: SocketAddr,
    /// Host component of the requested URL.
    pub host: String,
    /// Path component of the requested URL.
    pub path: String,
    /// Raw query string of the requested URL.
    pub query: String,
}

/// Outcome of a handshake policy decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Continue the handshake: create a session and issue a cookie.
    Accept,
    /// Redirect the requester; no session is created.
    Redirect(Vec<SocketAddr>),
}

/// A committed-session notification.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    /// Id of the freshly established session.
    pub session_id: SessionId,
    /// The peer's network address.
    pub address: SocketAddr,
}

/// Decides what happens to incoming handshakes and observes session commits.
///
/// Implementations must be cheap: both hooks run synchronously on the
/// handshake-processing path.
pub trait ConnectionPolicy: Send + Sync {
    /// Called for every parsed first-contact datagram.
    fn on_handshake(&self, event: &HandshakeEvent) -> Decision {
        let _ = event;
        Decision::Accept
    }

    /// Called once a session is fully committed in the registry.
    fn on_session(&self, event: &SessionEvent) {
        let _ = event;
    }
}

/// A policy that accepts every handshake.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ConnectionPolicy for AcceptAll {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all_accepts() {
        let event = HandshakeEvent {
            address: "127.0.0.1:4000".parse().unwrap(),
            host: "example.org".into(),
            path: "/live".into(),
            query: String::new(),
        };
        assert_eq!(AcceptAll.on_handshake(&event), Decision::Accept);
    }
}
