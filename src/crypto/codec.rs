//! Per-session AEAD packet sealing.
//!
//! Every session datagram is encrypted and authenticated with the session's
//! derived key. Decryption failure is reported as `None` and must degrade
//! to a silent drop at the wire boundary: answering a bad datagram would
//! hand an attacker a validity oracle.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::core::constants::{AEAD_NONCE_SIZE, REPLAY_WINDOW_SIZE};
use crate::core::error::CryptoError;

use super::keys::SessionKey;

/// Which way a datagram travels; separates the two nonce spaces so a
/// datagram can never be reflected back to its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Peer to server.
    ToServer,
    /// Server to peer.
    ToPeer,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Direction::ToServer => Direction::ToPeer,
            Direction::ToPeer => Direction::ToServer,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Direction::ToServer => 0x01,
            Direction::ToPeer => 0x02,
        }
    }
}

/// Seals and opens one session's datagrams.
pub struct PacketCipher {
    cipher: ChaCha20Poly1305,
    session_id: u32,
}

impl PacketCipher {
    /// Build a cipher over a derived session key.
    pub fn new(session_id: u32, key: &SessionKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
            session_id,
        }
    }

    /// Encrypt and tag a payload for sending.
    pub fn seal(
        &self,
        direction: Direction,
        counter: u64,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.nonce(direction, counter);
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &self.session_id.to_be_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Authenticate and decrypt a received payload.
    ///
    /// `None` means the datagram failed authentication; the caller drops it
    /// without responding and without touching session state.
    pub fn open(&self, direction: Direction, counter: u64, ciphertext: &[u8]) -> Option<Vec<u8>> {
        let nonce = self.nonce(direction, counter);
        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &self.session_id.to_be_bytes(),
                },
            )
            .ok()
    }

    /// Nonce layout: direction tag, three zero bytes, 64-bit counter.
    fn nonce(&self, direction: Direction, counter: u64) -> [u8; AEAD_NONCE_SIZE] {
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        nonce[0] = direction.tag();
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }
}

/// Sliding replay guard over inbound datagram counters.
///
/// Tracks the highest counter that authenticated successfully plus a bitmap
/// of the window just below it. A counter seen before, or older than the
/// window, is a replay. Only counters that passed authentication may be
/// recorded here; marking unauthenticated counters would let a spoofer
/// poison the window.
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    /// Highest accepted counter; bit 0 of `mask`.
    highest: u64,
    /// Seen-bitmap for `highest - 63 ..= highest`.
    mask: u64,
    /// Whether any counter has been accepted yet.
    seeded: bool,
}

impl ReplayWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an authenticated counter.
    ///
    /// Returns `false` when the counter was already seen or has fallen out
    /// of the window; the datagram is a replay and must be dropped.
    pub fn accept(&mut self, counter: u64) -> bool {
        if !self.seeded {
            self.seeded = true;
            self.highest = counter;
            self.mask = 1;
            return true;
        }

        if counter > self.highest {
            let advance = counter - self.highest;
            self.mask = if advance >= REPLAY_WINDOW_SIZE {
                0
            } else {
                self.mask << advance
            };
            self.mask |= 1;
            self.highest = counter;
            return true;
        }

        let age = self.highest - counter;
        if age >= REPLAY_WINDOW_SIZE {
            return false;
        }
        let bit = 1u64 << age;
        if self.mask & bit != 0 {
            return false;
        }
        self.mask |= bit;
        true
    }

    /// Whether a counter would be rejected, without recording it.
    pub fn is_replay(&self, counter: u64) -> bool {
        if !self.seeded || counter > self.highest {
            return false;
        }
        let age = self.highest - counter;
        age >= REPLAY_WINDOW_SIZE || self.mask & (1u64 << age) != 0
    }
}

impl std::fmt::Debug for PacketCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCipher")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
