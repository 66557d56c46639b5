//! ICE candidate exchange between peer pairs.
//!
//! The server never probes connectivity itself; it relays candidate lines
//! between the two peers of a negotiation and keeps the bookkeeping needed
//! to pick a deterministic pair and expire abandoned negotiations.

pub mod candidate;
pub mod negotiation;

pub use candidate::{Candidate, CandidateKind};
pub use negotiation::{IceNegotiation, IceTable, Side};
