//! Key agreement and session key derivation.
//!
//! The server holds a static X25519 keypair whose public half is the
//! "certificate" sent in every cookie response. A session key is derived
//! from the X25519 shared secret, salted with the issued cookie and the
//! peer's handshake randomness, so two sessions never share key material.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::constants::{
    COOKIE_SIZE, HELLO_RANDOM_SIZE, PUBLIC_KEY_SIZE, SESSION_KEY_SIZE,
};
use crate::core::error::CryptoError;

/// The server's static key-agreement identity.
pub struct ServerCertificate {
    secret: StaticSecret,
    public: PublicKey,
}

impl ServerCertificate {
    /// Generate a fresh certificate from the OS random source.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Restore a certificate from a stored private key.
    pub fn from_private_key(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public key bytes carried in cookie responses.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Compute the X25519 shared secret with a peer's public key.
    pub fn agree(&self, peer_public: &[u8; PUBLIC_KEY_SIZE]) -> [u8; 32] {
        *self
            .secret
            .diffie_hellman(&PublicKey::from(*peer_public))
            .as_bytes()
    }
}

impl std::fmt::Debug for ServerCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCertificate")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Derived symmetric key material of one session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Borrow the key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log key material.
        f.write_str("SessionKey(..)")
    }
}

/// Derive one session's key from the handshake transcript.
///
/// HKDF-SHA256 with the cookie as salt and the peer random bound into the
/// info string. Both sides compute the same key; datagram direction is
/// separated at the nonce level.
pub fn derive_session_key(
    shared_secret: &[u8; 32],
    cookie: &[u8; COOKIE_SIZE],
    peer_random: &[u8; HELLO_RANDOM_SIZE],
) -> Result<SessionKey, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(cookie), shared_secret);
    let mut info = Vec::with_capacity(24 + HELLO_RANDOM_SIZE);
    info.extend_from_slice(b"strand v1 session key");
    info.extend_from_slice(peer_random);

    let mut okm = [0u8; SESSION_KEY_SIZE];
    hkdf.expand(&info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(SessionKey::from_bytes(okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement_is_symmetric() {
        let server = ServerCertificate::generate();
        let peer = ServerCertificate::generate();

        let a = server.agree(&peer.public_bytes());
        let b = peer.agree(&server.public_bytes());
        assert_eq!(a, b);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let shared = [0x42u8; 32];
        let cookie = [0x01u8; COOKIE_SIZE];
        let random = [0x02u8; HELLO_RANDOM_SIZE];

        let k1 = derive_session_key(&shared, &cookie, &random).unwrap();
        let k2 = derive_session_key(&shared, &cookie, &random).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_distinct_cookies_yield_distinct_keys() {
        let shared = [0x42u8; 32];
        let random = [0x02u8; HELLO_RANDOM_SIZE];

        let k1 = derive_session_key(&shared, &[0x01; COOKIE_SIZE], &random).unwrap();
        let k2 = derive_session_key(&shared, &[0x03; COOKIE_SIZE], &random).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }
}
