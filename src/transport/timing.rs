//! Round-trip estimation and timing utilities.
//!
//! Implements the smoothed round-trip estimator of RFC 2988: each accepted
//! sample updates an exponentially-weighted ping and variance, from which
//! the retransmission timeout is derived.

use std::time::{Duration, Instant};

use crate::core::constants::{RTO_INIT, RTO_MAX, RTO_MIN};

/// Per-peer smoothed ping and retransmission-timeout state.
///
/// The estimator is embedded in the peer's connection record and lives for
/// the lifetime of the connection. Samples are whole milliseconds clamped
/// into `[1, 65535]`; the derived RTO is clamped into a configured band.
#[derive(Debug, Clone)]
pub struct PingEstimator {
    /// Smoothed ping in milliseconds, always in `[1, 65535]` once seeded.
    ping: u16,
    /// Smoothed variance in milliseconds.
    rttvar: f64,
    /// Current retransmission timeout in milliseconds.
    rto: u32,
    /// Lower bound of the RTO band.
    rto_min: u32,
    /// Upper bound of the RTO band.
    rto_max: u32,
}

impl Default for PingEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PingEstimator {
    /// Create an estimator with the default RTO band.
    pub fn new() -> Self {
        Self::with_band(RTO_MIN, RTO_MAX)
    }

    /// Create an estimator with a custom RTO band.
    pub fn with_band(rto_min: Duration, rto_max: Duration) -> Self {
        Self {
            ping: 0,
            rttvar: 0.0,
            rto: RTO_INIT.as_millis() as u32,
            rto_min: rto_min.as_millis() as u32,
            rto_max: rto_max.as_millis() as u32,
        }
    }

    /// Feed one observed round-trip sample, in whole milliseconds.
    ///
    /// A sample of 0 is treated as 1; samples above 65535 are clamped down.
    /// Returns the updated smoothed ping.
    pub fn sample(&mut self, value: u64) -> u16 {
        let value = value.clamp(1, u64::from(u16::MAX));

        if self.rttvar == 0.0 {
            self.rttvar = value as f64 / 2.0;
        } else {
            self.rttvar =
                (3.0 * self.rttvar + (f64::from(self.ping) - value as f64).abs()) / 4.0;
        }

        if self.ping == 0 {
            self.ping = value as u16;
        } else if value != u64::from(self.ping) {
            self.ping = ((7.0 * f64::from(self.ping) + value as f64) / 8.0) as u16;
        }

        self.rto = (f64::from(self.ping) + 4.0 * self.rttvar + 200.0) as u32;
        self.rto = self.rto.clamp(self.rto_min, self.rto_max);

        self.ping
    }

    /// Feed an observed round trip expressed as a [`Duration`].
    pub fn sample_duration(&mut self, rtt: Duration) -> u16 {
        self.sample(rtt.as_millis() as u64)
    }

    /// Current smoothed ping in milliseconds, 0 before the first sample.
    pub fn ping(&self) -> u16 {
        self.ping
    }

    /// Current smoothed variance in milliseconds.
    pub fn rttvar(&self) -> f64 {
        self.rttvar
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        Duration::from_millis(u64::from(self.rto))
    }

    /// Whether at least one sample has been observed.
    pub fn is_seeded(&self) -> bool {
        self.ping != 0
    }
}

/// Millisecond timestamps for round-trip measurement via timestamp echo.
///
/// Every session datagram carries a 16-bit send timestamp and echoes the
/// peer's most recent one; the wrapping difference between "now" and a
/// received echo is a round-trip sample.
#[derive(Debug, Clone)]
pub struct TimestampClock {
    /// Session start, origin of all timestamps.
    epoch: Instant,
    /// Most recent timestamp received from the peer (for echoing).
    last_peer_timestamp: u16,
    /// Whether we have a peer timestamp worth echoing.
    has_peer_timestamp: bool,
}

impl TimestampClock {
    /// Create a clock starting now.
    pub fn new() -> Self {
        Self::with_epoch(Instant::now())
    }

    /// Create a clock with a specific epoch.
    pub fn with_epoch(epoch: Instant) -> Self {
        Self {
            epoch,
            last_peer_timestamp: 0,
            has_peer_timestamp: false,
        }
    }

    /// Current 16-bit timestamp (milliseconds since epoch, wrapping).
    pub fn now(&self) -> u16 {
        self.now_at(Instant::now())
    }

    /// Timestamp at a given instant.
    pub fn now_at(&self, at: Instant) -> u16 {
        at.duration_since(self.epoch).as_millis() as u16
    }

    /// The echo value to put in the next outbound datagram, if any.
    pub fn echo(&self) -> Option<u16> {
        self.has_peer_timestamp.then_some(self.last_peer_timestamp)
    }

    /// Record the peer's send timestamp from a received datagram.
    pub fn on_peer_timestamp(&mut self, timestamp: u16) {
        self.last_peer_timestamp = timestamp;
        self.has_peer_timestamp = true;
    }

    /// Turn a received echo of our timestamp into a round-trip sample.
    pub fn rtt_from_echo(&self, echo: u16) -> u64 {
        u64::from(self.now().wrapping_sub(echo))
    }
}

impl Default for TimestampClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_initial() {
        let estimator = PingEstimator::new();
        assert!(!estimator.is_seeded());
        assert_eq!(estimator.ping(), 0);
        assert_eq!(estimator.rto(), RTO_INIT);
    }

    #[test]
    fn test_estimator_reference_vector() {
        // Documented deterministic sequence: sample(100) then sample(200).
        let mut estimator = PingEstimator::new();

        assert_eq!(estimator.sample(100), 100);
        assert_eq!(estimator.rttvar(), 50.0);
        assert_eq!(estimator.rto(), Duration::from_millis(500));

        assert_eq!(estimator.sample(200), 112);
        assert_eq!(estimator.rttvar(), 62.5);
        assert_eq!(estimator.rto(), Duration::from_millis(562));
    }

    #[test]
    fn test_estimator_sample_bounds() {
        let mut estimator = PingEstimator::new();

        // 0 is treated as 1.
        assert_eq!(estimator.sample(0), 1);

        let mut estimator = PingEstimator::new();
        // Oversized samples clamp down to the 16-bit ceiling.
        assert_eq!(estimator.sample(1_000_000), u16::MAX);
    }

    #[test]
    fn test_estimator_repeated_sample_keeps_ping() {
        let mut estimator = PingEstimator::new();
        estimator.sample(100);
        // A sample equal to the current ping does not move it.
        assert_eq!(estimator.sample(100), 100);
    }

    #[test]
    fn test_estimator_rto_clamped_to_band() {
        let mut estimator =
            PingEstimator::with_band(Duration::from_millis(1000), Duration::from_millis(2000));
        estimator.sample(1);
        assert_eq!(estimator.rto(), Duration::from_millis(1000));

        estimator.sample(60_000);
        assert_eq!(estimator.rto(), Duration::from_millis(2000));
    }

    #[test]
    fn test_timestamp_clock_echo() {
        let mut clock = TimestampClock::new();
        assert_eq!(clock.echo(), None);

        clock.on_peer_timestamp(4242);
        assert_eq!(clock.echo(), Some(4242));
    }

    #[test]
    fn test_timestamp_clock_wrapping_rtt() {
        let epoch = Instant::now() - Duration::from_millis(100);
        let clock = TimestampClock::with_epoch(epoch);

        // Echo of a timestamp taken ~60 ms ago.
        let echo = clock.now().wrapping_sub(60);
        let rtt = clock.rtt_from_echo(echo);
        assert!((60..70).contains(&rtt), "rtt={rtt}");
    }
}
