//! SDP candidate-attribute parsing.
//!
//! One `a=candidate:` line describes one network address a peer can be
//! reached at, either directly (host) or through a relay hop.

use std::net::{IpAddr, SocketAddr};

/// How a candidate address can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CandidateKind {
    /// Directly reachable address.
    Host,
    /// Reachable only through a relay hop (server-reflexive, peer-reflexive
    /// and relayed candidates all need one from the server's standpoint).
    Relayed,
}

/// One parsed ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Foundation string grouping related candidates.
    pub foundation: String,
    /// Component id (1 = RTP, 2 = RTCP).
    pub component: u16,
    /// Sender-assigned priority.
    pub priority: u32,
    /// The advertised transport address.
    pub address: SocketAddr,
    /// Reachability class.
    pub kind: CandidateKind,
}

impl Candidate {
    /// Parse one SDP candidate attribute.
    ///
    /// Accepts the bare attribute value as well as the `a=candidate:` and
    /// `candidate:` prefixed forms. Returns `None` for anything that does
    /// not parse; the caller skips the line and the negotiation continues.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let value = line
            .strip_prefix("a=candidate:")
            .or_else(|| line.strip_prefix("candidate:"))
            .unwrap_or(line);

        let mut fields = value.split_ascii_whitespace();
        let foundation = fields.next()?.to_owned();
        let component = fields.next()?.parse().ok()?;
        let transport = fields.next()?;
        if !transport.eq_ignore_ascii_case("udp") {
            return None;
        }
        let priority = fields.next()?.parse().ok()?;
        let ip: IpAddr = fields.next()?.parse().ok()?;
        let port: u16 = fields.next()?.parse().ok()?;
        if fields.next()? != "typ" {
            return None;
        }
        let kind = match fields.next()? {
            "host" => CandidateKind::Host,
            "srflx" | "prflx" | "relay" => CandidateKind::Relayed,
            _ => return None,
        };

        Some(Self {
            foundation,
            component,
            priority,
            address: SocketAddr::new(ip, port),
            kind,
        })
    }

    /// The deduplication key: two candidates with the same class and
    /// priority describe the same path.
    pub fn class_key(&self) -> (CandidateKind, u32) {
        (self.kind, self.priority)
    }
}
