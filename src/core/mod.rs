//! Core constants, errors, configuration and policy hooks.

pub mod config;
pub mod constants;
pub mod error;
pub mod hooks;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use constants::*;
pub use error::{CookieError, CryptoError, FrameError, ServerError, StrandError};
pub use hooks::{AcceptAll, ConnectionPolicy, Decision, HandshakeEvent, SessionEvent};
