//! Error types for the STRAND protocol.

use thiserror::Error;

/// Errors in the crypto layer.
///
/// Every variant on the receive path degrades to a silent drop at the wire
/// boundary: a failed decrypt is never acknowledged to the sender.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Errors when decoding wire data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Unexpected end of data.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// Unknown datagram or chunk type.
    #[error("unknown type: {0:#04x}")]
    UnknownType(u8),

    /// A length field points past the end of the datagram.
    #[error("invalid length field")]
    InvalidLength,

    /// Malformed field content.
    #[error("malformed field: {0}")]
    Malformed(&'static str),
}

/// Errors when consuming a handshake cookie.
///
/// All of these are security-sensitive rejections: the datagram carrying the
/// cookie is dropped without a response.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CookieError {
    /// The cookie was never issued or has already been consumed.
    #[error("unknown or already consumed cookie")]
    Unknown,

    /// The cookie was presented from an address other than the one it was
    /// issued to.
    #[error("cookie address mismatch")]
    AddressMismatch,

    /// The cookie's freshness window has elapsed.
    #[error("cookie expired")]
    Expired,
}

/// Errors that can occur in the STRAND server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// Session error.
    #[error("session error: {0}")]
    SessionError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server is shut down.
    #[error("server shut down")]
    Shutdown,
}

/// Top-level STRAND errors.
#[derive(Debug, Error)]
pub enum StrandError {
    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Wire decode error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Server error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
