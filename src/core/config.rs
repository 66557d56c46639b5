//! Server configuration.
//!
//! Out-of-range values are clamped to their nearest valid bound with a
//! logged warning, never rejected.

use std::time::Duration;

use tracing::warn;

use super::constants::{
    COOKIE_LIFETIME, DEFAULT_PORT, KEEPALIVE_FLOOR, KEEPALIVE_PEER, KEEPALIVE_SERVER, RTO_MAX,
    RTO_MIN,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP port to bind to.
    pub port: u16,

    /// Keepalive timeout for peer-originated sessions (floor 5 s).
    pub keepalive_peer: Duration,

    /// Keepalive timeout for server-originated sessions (floor 5 s).
    pub keepalive_server: Duration,

    /// Freshness window of a handshake cookie.
    pub cookie_lifetime: Duration,

    /// Lower bound of the retransmission-timeout band.
    pub rto_min: Duration,

    /// Upper bound of the retransmission-timeout band.
    pub rto_max: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            keepalive_peer: KEEPALIVE_PEER,
            keepalive_server: KEEPALIVE_SERVER,
            cookie_lifetime: COOKIE_LIFETIME,
            rto_min: RTO_MIN,
            rto_max: RTO_MAX,
        }
    }
}

impl ServerConfig {
    /// Clamp every configured value into its valid band.
    ///
    /// Keepalive intervals may never drop below the 5-second floor
    /// regardless of the configured value.
    pub fn validated(mut self) -> Self {
        if self.keepalive_peer < KEEPALIVE_FLOOR {
            warn!(
                configured = ?self.keepalive_peer,
                "keepalive_peer can't be less than 5 sec, clamping"
            );
            self.keepalive_peer = KEEPALIVE_FLOOR;
        }
        if self.keepalive_server < KEEPALIVE_FLOOR {
            warn!(
                configured = ?self.keepalive_server,
                "keepalive_server can't be less than 5 sec, clamping"
            );
            self.keepalive_server = KEEPALIVE_FLOOR;
        }
        if self.rto_min > self.rto_max {
            warn!(
                min = ?self.rto_min,
                max = ?self.rto_max,
                "inverted RTO band, restoring defaults"
            );
            self.rto_min = RTO_MIN;
            self.rto_max = RTO_MAX;
        }
        self
    }
}

/// Builder for creating a [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the UDP port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the peer-session keepalive timeout.
    pub fn keepalive_peer(mut self, timeout: Duration) -> Self {
        self.config.keepalive_peer = timeout;
        self
    }

    /// Set the server-session keepalive timeout.
    pub fn keepalive_server(mut self, timeout: Duration) -> Self {
        self.config.keepalive_server = timeout;
        self
    }

    /// Set the cookie freshness window.
    pub fn cookie_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.cookie_lifetime = lifetime;
        self
    }

    /// Set the retransmission-timeout band.
    pub fn rto_band(mut self, min: Duration, max: Duration) -> Self {
        self.config.rto_min = min;
        self.config.rto_max = max;
        self
    }

    /// Build the configuration, clamping out-of-range values.
    pub fn build(self) -> ServerConfig {
        self.config.validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 1935);
        assert_eq!(config.keepalive_peer, Duration::from_secs(10));
        assert_eq!(config.keepalive_server, Duration::from_secs(15));
    }

    #[test]
    fn test_keepalive_clamped_to_floor() {
        let config = ServerConfigBuilder::new()
            .keepalive_peer(Duration::from_secs(2))
            .build();
        assert_eq!(config.keepalive_peer, Duration::from_secs(5));
    }

    #[test]
    fn test_keepalive_above_floor_kept() {
        let config = ServerConfigBuilder::new()
            .keepalive_peer(Duration::from_secs(30))
            .keepalive_server(Duration::from_secs(7))
            .build();
        assert_eq!(config.keepalive_peer, Duration::from_secs(30));
        assert_eq!(config.keepalive_server, Duration::from_secs(7));
    }

    #[test]
    fn test_inverted_rto_band_restored() {
        let config = ServerConfigBuilder::new()
            .rto_band(Duration::from_secs(10), Duration::from_millis(1))
            .build();
        assert_eq!(config.rto_min, RTO_MIN);
        assert_eq!(config.rto_max, RTO_MAX);
    }
}
