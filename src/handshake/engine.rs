//! The handshake engine.
//!
//! Processes unauthenticated first-contact datagrams: consults the
//! connection policy, answers with either a redirection or a single-use
//! cookie plus the server certificate, and commits the session in the
//! registry once the cookie comes back. Responses are fire-and-forget
//! through the async send queue; the processing path never blocks on
//! socket I/O and never mutates shared session state before the registry
//! commit.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::core::constants::{COOKIE_SIZE, HELLO_RANDOM_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE};
use crate::core::hooks::{ConnectionPolicy, Decision, HandshakeEvent, SessionEvent};
use crate::crypto::{derive_session_key, PacketCipher, ServerCertificate};
use crate::session::{SessionClass, SessionRegistry};
use crate::transport::frame;
use crate::transport::socket::SendQueue;

use super::cookie::CookieJar;

/// Handles the unauthenticated phase of every connection.
pub struct HandshakeEngine {
    certificate: ServerCertificate,
    cookies: CookieJar,
    policy: Arc<dyn ConnectionPolicy>,
}

impl HandshakeEngine {
    /// Create an engine with a fresh certificate.
    pub fn new(cookie_lifetime: Duration, policy: Arc<dyn ConnectionPolicy>) -> Self {
        Self::with_certificate(ServerCertificate::generate(), cookie_lifetime, policy)
    }

    /// Create an engine over an existing certificate.
    pub fn with_certificate(
        certificate: ServerCertificate,
        cookie_lifetime: Duration,
        policy: Arc<dyn ConnectionPolicy>,
    ) -> Self {
        Self {
            certificate,
            cookies: CookieJar::new(cookie_lifetime),
            policy,
        }
    }

    /// The server certificate sent in cookie responses.
    pub fn certificate(&self) -> &ServerCertificate {
        &self.certificate
    }

    /// Process a first-contact datagram.
    pub fn on_hello(
        &self,
        tag: &[u8; TAG_SIZE],
        url: &str,
        random: &[u8; HELLO_RANDOM_SIZE],
        address: SocketAddr,
        registry: &SessionRegistry,
        queue: &SendQueue,
    ) {
        let (host, path, query) = split_url(url);
        let event = HandshakeEvent {
            address,
            host: host.to_owned(),
            path: path.to_owned(),
            query: query.to_owned(),
        };

        match self.policy.on_handshake(&event) {
            Decision::Redirect(addresses) => {
                debug!(peer = %address, count = addresses.len(), "handshake redirected");
                queue.enqueue(address, frame::encode_redirect_response(tag, &addresses));
            }
            Decision::Accept => {
                let session = registry.create(SessionClass::Peer, address);
                let cookie = self.cookies.mint(address, session.id(), *random);
                debug!(peer = %address, session = %session.id(), "cookie issued");
                queue.enqueue(
                    address,
                    frame::encode_cookie_response(tag, &cookie, &self.certificate.public_bytes()),
                );
            }
        }
    }

    /// Process a cookie follow-up datagram.
    ///
    /// Replayed, address-mismatched and expired cookies are dropped
    /// silently: no response is ever sent for a rejected cookie.
    pub fn on_cookie_ack(
        &self,
        cookie: &[u8; COOKIE_SIZE],
        peer_public: &[u8; PUBLIC_KEY_SIZE],
        address: SocketAddr,
        registry: &SessionRegistry,
        queue: &SendQueue,
    ) {
        let entry = match self.cookies.consume(cookie, address, Instant::now()) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(peer = %address, %err, "cookie rejected");
                return;
            }
        };

        let Some(session) = registry.resolve(entry.session) else {
            error!(session = %entry.session, "session unfound");
            return;
        };

        let shared_secret = self.certificate.agree(peer_public);
        let key = match derive_session_key(&shared_secret, cookie, &entry.peer_random) {
            Ok(key) => key,
            Err(err) => {
                error!(session = %session.id(), %err, "session key derivation failed");
                return;
            }
        };

        session
            .lock()
            .establish(PacketCipher::new(session.id().value, &key));
        info!(session = %session.id(), peer = %address, "session established");

        self.policy.on_session(&SessionEvent {
            session_id: session.id(),
            address,
        });
        queue.enqueue(address, frame::encode_session_ok(session.id().value));
    }

    /// Drop cookies past their freshness window.
    pub fn sweep_cookies(&self, now: Instant) -> usize {
        self.cookies.sweep(now)
    }
}

impl std::fmt::Debug for HandshakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeEngine")
            .field("cookies", &self.cookies.len())
            .finish_non_exhaustive()
    }
}

/// Split a requested URL into host, path and query.
///
/// Accepts `scheme://host/path?query`, `host/path?query` or a bare path;
/// a malformed URL degrades to empty components, never to an error.
pub fn split_url(url: &str) -> (&str, &str, &str) {
    let rest = match url.find("://") {
        Some(at) => &url[at + 3..],
        None => url,
    };
    let (authority, path_query) = match rest.find('/') {
        Some(at) => (&rest[..at], &rest[at..]),
        None => (rest, ""),
    };
    let (path, query) = match path_query.find('?') {
        Some(at) => (&path_query[..at], &path_query[at + 1..]),
        None => (path_query, ""),
    };
    (authority, path, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ServerConfig;
    use crate::core::hooks::AcceptAll;
    use crate::core::constants::{TYPE_COOKIE, TYPE_REDIRECT};
    use crate::crypto::Direction;
    use crate::session::SessionState;
    use crate::transport::frame::{HandshakePacket, Reader, HANDSHAKE_ID};
    use crate::transport::socket::StrandSocket;

    struct RedirectAll;

    impl ConnectionPolicy for RedirectAll {
        fn on_handshake(&self, _event: &HandshakeEvent) -> Decision {
            Decision::Redirect(vec!["10.0.0.2:1935".parse().unwrap()])
        }
    }

    #[test]
    fn test_split_url() {
        assert_eq!(
            split_url("strand://media.example.org/live/cam1?token=abc"),
            ("media.example.org", "/live/cam1", "token=abc")
        );
        assert_eq!(split_url("host/path"), ("host", "/path", ""));
        assert_eq!(split_url("justhost"), ("justhost", "", ""));
        assert_eq!(split_url(""), ("", "", ""));
    }

    async fn harness() -> (StrandSocket, SendQueue, SessionRegistry) {
        let receiver = StrandSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let sender = StrandSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let (queue, _task) = sender.spawn_sender();
        let registry = SessionRegistry::new(&ServerConfig::default());
        (receiver, queue, registry)
    }

    #[tokio::test]
    async fn test_hello_yields_cookie_and_session() {
        let (mut receiver, queue, registry) = harness().await;
        let peer = receiver.local_addr().unwrap();
        let engine = HandshakeEngine::new(Duration::from_secs(95), Arc::new(AcceptAll));

        let tag = [0x7Eu8; TAG_SIZE];
        engine.on_hello(
            &tag,
            "strand://h/app",
            &[1; HELLO_RANDOM_SIZE],
            peer,
            &registry,
            &queue,
        );
        assert_eq!(registry.len(), 1);

        let (data, _) = receiver.recv_from().await.unwrap();
        let mut reader = Reader::new(data);
        assert_eq!(reader.read_u32().unwrap(), HANDSHAKE_ID);
        assert_eq!(reader.read_u8().unwrap(), TYPE_COOKIE);
        assert_eq!(reader.read_array::<TAG_SIZE>().unwrap(), tag);
        assert_eq!(reader.read_u8().unwrap() as usize, COOKIE_SIZE);
    }

    #[tokio::test]
    async fn test_redirect_creates_no_session() {
        let (mut receiver, queue, registry) = harness().await;
        let peer = receiver.local_addr().unwrap();
        let engine = HandshakeEngine::new(Duration::from_secs(95), Arc::new(RedirectAll));

        let tag = [0x11u8; TAG_SIZE];
        engine.on_hello(
            &tag,
            "strand://h/app",
            &[1; HELLO_RANDOM_SIZE],
            peer,
            &registry,
            &queue,
        );
        assert!(registry.is_empty());

        let (data, _) = receiver.recv_from().await.unwrap();
        let mut reader = Reader::new(data);
        assert_eq!(reader.read_u32().unwrap(), HANDSHAKE_ID);
        assert_eq!(reader.read_u8().unwrap(), TYPE_REDIRECT);
        assert_eq!(reader.read_array::<TAG_SIZE>().unwrap(), tag);
        assert_eq!(reader.read_u8().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_full_handshake_establishes_matching_keys() {
        let (mut receiver, queue, registry) = harness().await;
        let peer = receiver.local_addr().unwrap();
        let engine = HandshakeEngine::new(Duration::from_secs(95), Arc::new(AcceptAll));

        let peer_random = [9u8; HELLO_RANDOM_SIZE];
        engine.on_hello(
            &[0u8; TAG_SIZE],
            "strand://h/app",
            &peer_random,
            peer,
            &registry,
            &queue,
        );

        // Read the cookie response off the wire like a client would.
        let (data, _) = receiver.recv_from().await.unwrap();
        let mut reader = Reader::new(data);
        reader.read_u32().unwrap();
        reader.read_u8().unwrap();
        reader.read_array::<TAG_SIZE>().unwrap();
        reader.read_u8().unwrap();
        let cookie = reader.read_array::<COOKIE_SIZE>().unwrap();
        let certificate = reader.read_array::<PUBLIC_KEY_SIZE>().unwrap();

        let client = ServerCertificate::generate();
        engine.on_cookie_ack(
            &cookie,
            &client.public_bytes(),
            peer,
            &registry,
            &queue,
        );

        let session_value = u32::from_be_bytes(cookie[..4].try_into().unwrap());
        let session = registry.find(session_value).unwrap();
        assert_eq!(session.state(), SessionState::Established);

        // Client derives the same key and can open server traffic.
        let shared = client.agree(&certificate);
        let key = derive_session_key(&shared, &cookie, &peer_random).unwrap();
        let client_cipher = PacketCipher::new(session_value, &key);

        let mut inner = session.lock();
        let counter = inner.next_send_counter();
        let sealed = inner
            .cipher
            .as_ref()
            .unwrap()
            .seal(Direction::ToPeer, counter, b"welcome")
            .unwrap();
        assert_eq!(
            client_cipher.open(Direction::ToPeer, counter, &sealed).unwrap(),
            b"welcome"
        );
    }

    #[tokio::test]
    async fn test_replayed_cookie_from_other_address_ignored() {
        let (mut receiver, queue, registry) = harness().await;
        let peer = receiver.local_addr().unwrap();
        let engine = HandshakeEngine::new(Duration::from_secs(95), Arc::new(AcceptAll));

        engine.on_hello(
            &[0u8; TAG_SIZE],
            "strand://h/app",
            &[0; HELLO_RANDOM_SIZE],
            peer,
            &registry,
            &queue,
        );
        let (data, _) = receiver.recv_from().await.unwrap();
        let mut reader = Reader::new(data);
        reader.read_u32().unwrap();
        reader.read_u8().unwrap();
        reader.read_array::<TAG_SIZE>().unwrap();
        reader.read_u8().unwrap();
        let cookie = reader.read_array::<COOKIE_SIZE>().unwrap();

        let attacker: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let client = ServerCertificate::generate();
        engine.on_cookie_ack(&cookie, &client.public_bytes(), attacker, &registry, &queue);

        // Still pending: the replay neither established nor answered.
        let session_value = u32::from_be_bytes(cookie[..4].try_into().unwrap());
        assert_eq!(
            registry.find(session_value).unwrap().state(),
            SessionState::Pending
        );
    }

    #[tokio::test]
    async fn test_parsed_event_reaches_policy() {
        struct Capture(std::sync::Mutex<Option<HandshakeEvent>>);
        impl ConnectionPolicy for Capture {
            fn on_handshake(&self, event: &HandshakeEvent) -> Decision {
                *self.0.lock().unwrap() = Some(event.clone());
                Decision::Accept
            }
        }

        let (receiver, queue, registry) = harness().await;
        let peer = receiver.local_addr().unwrap();
        let capture = Arc::new(Capture(std::sync::Mutex::new(None)));
        let engine =
            HandshakeEngine::new(Duration::from_secs(95), Arc::clone(&capture) as Arc<_>);

        engine.on_hello(
            &[0u8; TAG_SIZE],
            "strand://media.example.org/live/cam1?token=abc",
            &[0; HELLO_RANDOM_SIZE],
            peer,
            &registry,
            &queue,
        );

        let event = capture.0.lock().unwrap().take().unwrap();
        assert_eq!(event.host, "media.example.org");
        assert_eq!(event.path, "/live/cam1");
        assert_eq!(event.query, "token=abc");
        assert_eq!(event.address, peer);
    }
}
