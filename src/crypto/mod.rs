//! Crypto layer: key agreement, key derivation, AEAD packet sealing.

pub mod codec;
pub mod keys;

pub use codec::{Direction, PacketCipher, ReplayWindow};
pub use keys::{derive_session_key, ServerCertificate, SessionKey};
