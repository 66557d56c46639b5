//! ICE candidate negotiation state.
//!
//! One [`IceNegotiation`] record per ordered (initiator, remote) peer pair,
//! accumulating candidate sets per media index. The record never schedules
//! its own eviction: it only answers [`IceNegotiation::obsolete_at`] and its
//! owner sweeps obsolete records periodically.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

use crate::core::constants::ICE_OBSOLETE_AFTER;

use super::candidate::{Candidate, CandidateKind};

/// Whose record subsequent candidate updates apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The peer that opened the negotiation.
    Initiator,
    /// The other peer.
    Remote,
}

/// Candidate sets of one media index.
#[derive(Debug, Default)]
struct MediaRecord {
    /// Addresses observed for the initiator, first-seen order.
    initiator: Vec<Candidate>,
    /// Addresses observed for the remote peer, first-seen order.
    remote: Vec<Candidate>,
    /// Relay port assignments for this media index.
    relay_ports: BTreeSet<u16>,
}

impl MediaRecord {
    fn side(&self, side: Side) -> &Vec<Candidate> {
        match side {
            Side::Initiator => &self.initiator,
            Side::Remote => &self.remote,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Vec<Candidate> {
        match side {
            Side::Initiator => &mut self.initiator,
            Side::Remote => &mut self.remote,
        }
    }
}

/// Candidate negotiation state for one ordered peer pair.
#[derive(Debug)]
pub struct IceNegotiation {
    media: BTreeMap<u16, MediaRecord>,
    media_index: u16,
    current: Side,
    first: bool,
    public_host: Option<String>,
    last_activity: Instant,
}

impl Default for IceNegotiation {
    fn default() -> Self {
        Self::new()
    }
}

impl IceNegotiation {
    /// Create an empty negotiation record.
    pub fn new() -> Self {
        Self {
            media: BTreeMap::new(),
            media_index: 0,
            current: Side::Initiator,
            first: true,
            public_host: None,
            last_activity: Instant::now(),
        }
    }

    /// Select the media index subsequent candidate lines belong to.
    pub fn set_media_index(&mut self, index: u16) {
        self.media_index = index;
    }

    /// Select whose record subsequent candidate updates apply to.
    pub fn set_current(&mut self, side: Side) {
        self.current = side;
    }

    /// Process one SDP candidate line for the current side and media index.
    ///
    /// Returns `true` when the candidate was parsed (even if it turned out
    /// to be a duplicate). An unparseable line is skipped and the
    /// negotiation continues unaffected.
    pub fn from_sdp_line(&mut self, line: &str) -> bool {
        let Some(candidate) = Candidate::parse(line) else {
            debug!(line, "skipped unparseable candidate line");
            return false;
        };

        // The very first candidate seen seeds the record's public host.
        if self.first {
            self.public_host = Some(candidate.address.ip().to_string());
            self.first = false;
        }

        if candidate.kind == CandidateKind::Relayed {
            self.media
                .entry(self.media_index)
                .or_default()
                .relay_ports
                .insert(candidate.address.port());
        }

        let record = self.media.entry(self.media_index).or_default();
        let set = record.side_mut(self.current);
        let key = candidate.class_key();
        if set.iter().all(|existing| existing.class_key() != key) {
            set.push(candidate);
        }

        self.last_activity = Instant::now();
        true
    }

    /// Candidates observed for one side of one media index, first-seen
    /// order.
    pub fn candidates(&self, media_index: u16, side: Side) -> &[Candidate] {
        self.media
            .get(&media_index)
            .map(|record| record.side(side).as_slice())
            .unwrap_or(&[])
    }

    /// Relay port assignments of one media index.
    pub fn relay_ports(&self, media_index: u16) -> impl Iterator<Item = u16> + '_ {
        self.media
            .get(&media_index)
            .into_iter()
            .flat_map(|record| record.relay_ports.iter().copied())
    }

    /// The public host seeded by the first candidate, if any.
    pub fn public_host(&self) -> Option<&str> {
        self.public_host.as_deref()
    }

    /// Whether no candidate has been processed since creation or the last
    /// [`reset`](Self::reset).
    pub fn is_empty(&self) -> bool {
        self.first
    }

    /// Return to the empty state; used on renegotiation / ICE restart.
    pub fn reset(&mut self) {
        self.media.clear();
        self.public_host = None;
        self.first = true;
        self.last_activity = Instant::now();
    }

    /// Last time a candidate was applied or the record was reset.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Pure obsolescence predicate: ≥ 120 s without activity as of `now`.
    pub fn obsolete_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) >= ICE_OBSOLETE_AFTER
    }

    /// [`obsolete_at`](Self::obsolete_at) against the current time.
    pub fn obsolete(&self) -> bool {
        self.obsolete_at(Instant::now())
    }

    /// Deterministic candidate-pair selection for one media index.
    ///
    /// Prefers pairs with fewer relayed members (host/host first), breaking
    /// remaining ties by first-seen order on the initiator side, then on
    /// the remote side.
    pub fn select_pair(&self, media_index: u16) -> Option<(&Candidate, &Candidate)> {
        let record = self.media.get(&media_index)?;
        for relayed_members in 0..=2usize {
            for ours in &record.initiator {
                for theirs in &record.remote {
                    let relayed = usize::from(ours.kind == CandidateKind::Relayed)
                        + usize::from(theirs.kind == CandidateKind::Relayed);
                    if relayed == relayed_members {
                        return Some((ours, theirs));
                    }
                }
            }
        }
        None
    }
}

/// An ordered peer pair identifying one negotiation.
pub type PeerPair = (String, String);

/// Owner of all live negotiation records.
///
/// The table is the sweeping collaborator the records themselves rely on:
/// [`sweep`](IceTable::sweep) drops every obsolete record.
#[derive(Debug, Default)]
pub struct IceTable {
    records: Mutex<HashMap<PeerPair, IceNegotiation>>,
}

impl IceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a closure over the record of a peer pair, creating it at
    /// negotiation start.
    pub fn with_record<R>(
        &self,
        initiator: &str,
        remote: &str,
        f: impl FnOnce(&mut IceNegotiation) -> R,
    ) -> R {
        let mut records = self.lock();
        let record = records
            .entry((initiator.to_owned(), remote.to_owned()))
            .or_default();
        f(record)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no negotiation is live.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every record obsolete as of `now`.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| !record.obsolete_at(now));
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, "obsolete ICE records swept");
        }
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PeerPair, IceNegotiation>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
