//! Handshake engine and single-use cookies.

pub mod cookie;
pub mod engine;

pub use cookie::{CookieEntry, CookieJar};
pub use engine::{split_url, HandshakeEngine};
