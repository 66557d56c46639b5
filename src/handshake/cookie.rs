//! Single-use handshake cookies.
//!
//! A cookie proves the requester controls the claimed source address before
//! the server commits session resources. Each cookie is bound to the address
//! it was issued to and to its creation time; it is consumed exactly once
//! and rejected after its freshness window elapses.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::core::constants::{COOKIE_SIZE, HELLO_RANDOM_SIZE};
use crate::core::error::CookieError;
use crate::session::SessionId;

/// What a cookie was bound to when it was minted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieEntry {
    /// Address the cookie was issued to; presentation from any other
    /// address is rejected.
    pub address: SocketAddr,
    /// Creation time; start of the freshness window.
    pub created: Instant,
    /// The provisional session the cookie belongs to.
    pub session: SessionId,
    /// Peer randomness from the first-contact datagram, kept for key
    /// derivation on the follow-up.
    pub peer_random: [u8; HELLO_RANDOM_SIZE],
}

/// Issues and redeems single-use cookies.
#[derive(Debug)]
pub struct CookieJar {
    entries: Mutex<HashMap<[u8; COOKIE_SIZE], CookieEntry>>,
    lifetime: Duration,
}

impl CookieJar {
    /// Create a jar with the given freshness window.
    pub fn new(lifetime: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            lifetime,
        }
    }

    /// Mint a cookie bound to `address` for a provisional session.
    ///
    /// The first four bytes carry the session's wire id so the peer can
    /// address its first session datagram; the remaining bytes come from
    /// the OS secure random source, so cookies are never guessable.
    pub fn mint(
        &self,
        address: SocketAddr,
        session: SessionId,
        peer_random: [u8; HELLO_RANDOM_SIZE],
    ) -> [u8; COOKIE_SIZE] {
        let mut cookie = [0u8; COOKIE_SIZE];
        cookie[..4].copy_from_slice(&session.value.to_be_bytes());
        OsRng.fill_bytes(&mut cookie[4..]);

        self.lock().insert(
            cookie,
            CookieEntry {
                address,
                created: Instant::now(),
                session,
                peer_random,
            },
        );
        cookie
    }

    /// Redeem a cookie presented from `address` at time `now`.
    ///
    /// On success the cookie is gone for good. A presentation from the
    /// wrong address does not consume the cookie: the legitimate holder
    /// is not punished for an attacker's replay attempt.
    pub fn consume(
        &self,
        cookie: &[u8; COOKIE_SIZE],
        address: SocketAddr,
        now: Instant,
    ) -> Result<CookieEntry, CookieError> {
        let mut entries = self.lock();
        let Entry::Occupied(slot) = entries.entry(*cookie) else {
            return Err(CookieError::Unknown);
        };
        if slot.get().address != address {
            return Err(CookieError::AddressMismatch);
        }
        let entry = slot.remove();
        if now.saturating_duration_since(entry.created) >= self.lifetime {
            return Err(CookieError::Expired);
        }
        Ok(entry)
    }

    /// Drop every cookie past its freshness window.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.created) < self.lifetime);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "expired cookies swept");
        }
        removed
    }

    /// Number of outstanding cookies.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no cookies are outstanding.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<[u8; COOKIE_SIZE], CookieEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
