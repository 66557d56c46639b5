//! Flow multiplexing: ordered logical channels within one session.
//!
//! A [`FlowWriter`] owns the send side of one flow: an ordered fragment
//! queue, the acknowledged-offset cursor, and retransmission state. A
//! [`FlowReceiver`] reassembles inbound fragments into sender-sequence
//! order. Distinct flows carry no relative ordering guarantee.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use crate::core::constants::DEFAULT_FLOW_WINDOW;
use crate::transport::frame::Chunk;

/// Cap on the retransmission backoff doubling (rto << 6 = 64x).
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Debug)]
struct PendingFragment {
    sequence: u64,
    payload: Vec<u8>,
    last_sent: Option<Instant>,
}

/// Send-side state of one flow.
#[derive(Debug)]
pub struct FlowWriter {
    /// Flow id, unique within the owning session.
    id: u32,
    /// Next sequence number to assign.
    next_sequence: u64,
    /// All sequences below this are acknowledged.
    acked: u64,
    /// Unacknowledged and not-yet-sent fragments, in sequence order.
    queue: VecDeque<PendingFragment>,
    /// Max unacknowledged fragments in flight.
    window: usize,
    /// Current backoff exponent; grows on consecutive losses, resets on a
    /// fresh acknowledgment.
    backoff_shift: u32,
}

impl FlowWriter {
    /// Create a writer with the default flow-control window.
    pub fn new(id: u32) -> Self {
        Self::with_window(id, DEFAULT_FLOW_WINDOW)
    }

    /// Create a writer with a custom window.
    pub fn with_window(id: u32, window: usize) -> Self {
        Self {
            id,
            next_sequence: 0,
            acked: 0,
            queue: VecDeque::new(),
            window: window.max(1),
            backoff_shift: 0,
        }
    }

    /// The flow id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// All sequences below this value have been acknowledged.
    pub fn acked(&self) -> u64 {
        self.acked
    }

    /// Fragments queued or awaiting acknowledgment.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueue one outbound fragment. Non-blocking; returns the assigned
    /// sequence number.
    pub fn enqueue(&mut self, payload: Vec<u8>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.push_back(PendingFragment {
            sequence,
            payload,
            last_sent: None,
        });
        sequence
    }

    /// Apply a cumulative acknowledgment: every sequence below `up_to` is
    /// dropped from the queue. Returns `true` when the ack made progress,
    /// which also resets the retransmission backoff.
    pub fn on_ack(&mut self, up_to: u64) -> bool {
        if up_to <= self.acked {
            return false;
        }
        self.acked = up_to;
        while self
            .queue
            .front()
            .is_some_and(|fragment| fragment.sequence < up_to)
        {
            self.queue.pop_front();
        }
        self.backoff_shift = 0;
        true
    }

    /// Collect the fragments to (re)send now.
    ///
    /// Unsent fragments inside the window go out immediately; fragments
    /// already in flight are retransmitted once the backed-off RTO has
    /// elapsed since their last send. A flush that retransmits anything
    /// counts as one more consecutive loss: the delay before the next
    /// retransmission is monotonically non-decreasing until an ack lands.
    pub fn flush(&mut self, now: Instant, rto: Duration) -> Vec<Chunk> {
        let delay = rto.saturating_mul(1 << self.backoff_shift.min(MAX_BACKOFF_SHIFT));
        let mut out = Vec::new();
        let mut retransmitted = false;

        for fragment in self.queue.iter_mut().take(self.window) {
            let due = match fragment.last_sent {
                None => true,
                Some(sent) => now.duration_since(sent) >= delay,
            };
            if !due {
                continue;
            }
            if fragment.last_sent.is_some() {
                retransmitted = true;
            }
            fragment.last_sent = Some(now);
            out.push(Chunk::Data {
                flow_id: self.id,
                sequence: fragment.sequence,
                payload: fragment.payload.clone(),
            });
        }

        if retransmitted && self.backoff_shift < MAX_BACKOFF_SHIFT {
            self.backoff_shift += 1;
        }
        out
    }
}

/// Receive-side reassembly of one flow.
///
/// Fragments are delivered strictly in sender-sequence order; a gap blocks
/// later fragments of this flow only.
#[derive(Debug)]
pub struct FlowReceiver {
    /// Flow id, unique within the owning session.
    id: u32,
    /// Next in-order sequence expected.
    next_sequence: u64,
    /// Out-of-order fragments waiting for the gap to fill.
    pending: BTreeMap<u64, Vec<u8>>,
}

impl FlowReceiver {
    /// Create an empty receiver.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            next_sequence: 0,
            pending: BTreeMap::new(),
        }
    }

    /// The flow id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// One past the highest in-order sequence received; the value to put
    /// in a cumulative acknowledgment.
    pub fn cumulative_ack(&self) -> u64 {
        self.next_sequence
    }

    /// Accept one fragment and return every payload that became deliverable
    /// in order. Duplicates and already-delivered sequences are dropped.
    pub fn on_fragment(&mut self, sequence: u64, payload: Vec<u8>) -> Vec<Vec<u8>> {
        if sequence < self.next_sequence {
            return Vec::new();
        }
        self.pending.entry(sequence).or_insert(payload);

        let mut delivered = Vec::new();
        while let Some(payload) = self.pending.remove(&self.next_sequence) {
            delivered.push(payload);
            self.next_sequence += 1;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(chunk: &Chunk) -> (u64, &[u8]) {
        match chunk {
            Chunk::Data {
                sequence, payload, ..
            } => (*sequence, payload),
            other => panic!("not a data chunk: {other:?}"),
        }
    }

    #[test]
    fn test_writer_assigns_sequences() {
        let mut writer = FlowWriter::new(3);
        assert_eq!(writer.enqueue(b"a".to_vec()), 0);
        assert_eq!(writer.enqueue(b"b".to_vec()), 1);
        assert_eq!(writer.pending(), 2);
    }

    #[test]
    fn test_writer_flush_and_ack() {
        let mut writer = FlowWriter::new(3);
        writer.enqueue(b"a".to_vec());
        writer.enqueue(b"b".to_vec());

        let now = Instant::now();
        let rto = Duration::from_millis(500);
        let sent = writer.flush(now, rto);
        assert_eq!(sent.len(), 2);

        // Nothing due immediately after sending.
        assert!(writer.flush(now, rto).is_empty());

        assert!(writer.on_ack(2));
        assert!(writer.is_idle());
        assert_eq!(writer.acked(), 2);

        // Stale ack makes no progress.
        assert!(!writer.on_ack(1));
    }

    #[test]
    fn test_writer_retransmit_backs_off() {
        let mut writer = FlowWriter::new(1);
        writer.enqueue(b"x".to_vec());

        let rto = Duration::from_millis(100);
        let start = Instant::now();
        assert_eq!(writer.flush(start, rto).len(), 1);

        // First retransmission after one RTO.
        assert!(writer.flush(start + Duration::from_millis(99), rto).is_empty());
        assert_eq!(writer.flush(start + Duration::from_millis(100), rto).len(), 1);

        // Backoff doubled: the next one needs two RTOs.
        let after_first = start + Duration::from_millis(100);
        assert!(writer
            .flush(after_first + Duration::from_millis(150), rto)
            .is_empty());
        assert_eq!(
            writer
                .flush(after_first + Duration::from_millis(200), rto)
                .len(),
            1
        );
    }

    #[test]
    fn test_writer_backoff_resets_on_ack() {
        let mut writer = FlowWriter::new(1);
        writer.enqueue(b"x".to_vec());
        writer.enqueue(b"y".to_vec());

        let rto = Duration::from_millis(100);
        let mut now = Instant::now();
        writer.flush(now, rto);
        now += Duration::from_millis(100);
        writer.flush(now, rto); // loss, backoff -> 1
        now += Duration::from_millis(200);
        writer.flush(now, rto); // loss, backoff -> 2

        assert!(writer.on_ack(1));

        // Fresh ack reset the backoff: one RTO suffices again.
        now += Duration::from_millis(100);
        let sent = writer.flush(now, rto);
        assert_eq!(sent.len(), 1);
        assert_eq!(data(&sent[0]).0, 1);
    }

    #[test]
    fn test_writer_respects_window() {
        let mut writer = FlowWriter::with_window(1, 2);
        for i in 0..5u8 {
            writer.enqueue(vec![i]);
        }
        let sent = writer.flush(Instant::now(), Duration::from_millis(100));
        assert_eq!(sent.len(), 2);

        writer.on_ack(2);
        let sent = writer.flush(Instant::now(), Duration::from_millis(100));
        assert_eq!(sent.len(), 2);
        assert_eq!(data(&sent[0]).0, 2);
    }

    #[test]
    fn test_receiver_in_order() {
        let mut receiver = FlowReceiver::new(1);
        assert_eq!(receiver.on_fragment(0, b"a".to_vec()), vec![b"a".to_vec()]);
        assert_eq!(receiver.on_fragment(1, b"b".to_vec()), vec![b"b".to_vec()]);
        assert_eq!(receiver.cumulative_ack(), 2);
    }

    #[test]
    fn test_receiver_gap_blocks_same_flow_only() {
        let mut receiver = FlowReceiver::new(1);
        let mut other = FlowReceiver::new(2);

        // Sequence 1 arrives before 0: held back.
        assert!(receiver.on_fragment(1, b"b".to_vec()).is_empty());

        // A different flow is not blocked by that gap.
        assert_eq!(other.on_fragment(0, b"x".to_vec()), vec![b"x".to_vec()]);

        // Filling the gap releases the run in order.
        assert_eq!(
            receiver.on_fragment(0, b"a".to_vec()),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn test_receiver_out_of_order_arrival() {
        let mut receiver = FlowReceiver::new(1);
        assert!(receiver.on_fragment(2, b"c".to_vec()).is_empty());
        assert!(receiver.on_fragment(1, b"b".to_vec()).is_empty());
        let run = receiver.on_fragment(0, b"a".to_vec());
        assert_eq!(run, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(receiver.cumulative_ack(), 3);
    }

    #[test]
    fn test_receiver_drops_duplicates() {
        let mut receiver = FlowReceiver::new(1);
        receiver.on_fragment(0, b"a".to_vec());
        assert!(receiver.on_fragment(0, b"a".to_vec()).is_empty());
        assert_eq!(receiver.cumulative_ack(), 1);
    }
}
