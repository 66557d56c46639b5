//! # STRAND Protocol
//!
//! **S**ecure **T**ransport for **R**eal-time **A**udiovisual **N**etwork
//! **D**elivery
//!
//! STRAND is a secure, UDP-based session protocol for real-time media
//! servers. It provides:
//!
//! - **Security**: cookie-validated handshakes, authenticated encryption,
//!   silent rejection of unauthenticated traffic
//! - **Multiplexing**: independently ordered flows within one session
//! - **Adaptivity**: smoothed round-trip estimation driving retransmission
//!   timeouts with exponential backoff
//! - **Rendezvous**: ICE candidate relaying between peer pairs
//!
//! ## Modules
//!
//! - [`core`]: constants, errors, configuration and policy hooks
//! - [`transport`]: wire frames, round-trip timing, sockets
//! - [`crypto`]: key agreement, key derivation, AEAD packet sealing
//! - [`session`]: sessions, the session registry, flow multiplexing
//! - [`handshake`]: the handshake engine and single-use cookies
//! - [`ice`]: candidate parsing and negotiation records
//! - [`server`]: the reactor loop tying everything together
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strand_protocol::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), StrandError> {
//!     let config = ServerConfigBuilder::new().port(1935).build();
//!     let (server, mut events) = StrandServer::bind(config, Arc::new(AcceptAll)).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ServerEvent::SessionEstablished { session_id, address } => {
//!                 println!("session {session_id} from {address}");
//!             }
//!             ServerEvent::FlowData { session_id, flow_id, payload } => {
//!                 // Echo the payload back on the same flow.
//!                 server.send(session_id.value, flow_id, payload)?;
//!             }
//!             ServerEvent::SessionClosed { session_id } => {
//!                 println!("session {session_id} closed");
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;

pub mod transport;

pub mod crypto;

pub mod session;

pub mod handshake;

pub mod ice;

pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        AcceptAll, ConnectionPolicy, Decision, HandshakeEvent, ServerConfig, ServerConfigBuilder,
        SessionEvent, StrandError,
    };
    pub use crate::ice::{Candidate, CandidateKind, IceNegotiation, Side};
    pub use crate::server::{ServerEvent, StrandServer};
    pub use crate::session::{SessionClass, SessionId, SessionState};
    pub use crate::transport::PingEstimator;
}

// Re-export commonly used items at crate root
pub use crate::core::{ServerConfig, ServerConfigBuilder, StrandError};
pub use crate::server::{ServerEvent, StrandServer};
pub use crate::session::{SessionId, SessionRegistry};
