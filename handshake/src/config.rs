//! Configuration for QSSL sessions

use std::time::Duration;

use crate::frame::MAX_DATAGRAM_LEN;

/// Configuration shared by both endpoints of a session
#[derive(Clone, Debug)]
pub struct QsslConfig {
    /// How long to wait for an acknowledgment before retransmitting
    pub ack_timeout: Duration,

    /// Retransmissions of one datagram before giving up
    pub max_retries: u32,

    /// How long `receive` waits for the next frame
    pub receive_timeout: Duration,

    /// Deadline for key exchange plus establishment
    pub handshake_timeout: Duration,

    /// Largest datagram sent or accepted
    pub max_datagram_len: usize,

    /// Whether to log detailed handshake information
    pub verbose_logging: bool,
}

impl Default for QsslConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(500),
            max_retries: 5,
            receive_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(60),
            max_datagram_len: MAX_DATAGRAM_LEN,
            verbose_logging: false,
        }
    }
}

impl QsslConfig {
    /// Create a configuration with default timeouts
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timeouts and verbose logs, for loopback testing
    pub fn development() -> Self {
        Self {
            ack_timeout: Duration::from_millis(200),
            max_retries: 5,
            receive_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            max_datagram_len: MAX_DATAGRAM_LEN,
            verbose_logging: true,
        }
    }

    /// Set the handshake timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn builder() -> QsslConfigBuilder {
        QsslConfigBuilder::new()
    }
}

/// Builder for QsslConfig
pub struct QsslConfigBuilder {
    config: QsslConfig,
}

impl Default for QsslConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QsslConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            config: QsslConfig::default(),
        }
    }

    /// Set the acknowledgment timeout
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    /// Set the retransmission limit
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the per-frame receive timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive_timeout = timeout;
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the datagram size limit
    pub fn max_datagram_len(mut self, len: usize) -> Self {
        self.config.max_datagram_len = len;
        self
    }

    /// Enable verbose logging
    pub fn verbose(mut self) -> Self {
        self.config.verbose_logging = true;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<QsslConfig, &'static str> {
        let config = self.config;
        if config.ack_timeout.is_zero() {
            return Err("ack timeout must be non-zero");
        }
        if config.max_datagram_len < crate::frame::MIN_DATAGRAM_LEN {
            return Err("datagram limit cannot carry a post-quantum signature frame");
        }
        if config.max_datagram_len > u16::MAX as usize {
            return Err("datagram limit must fit a UDP payload");
        }
        Ok(config)
    }
}
