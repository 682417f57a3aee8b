//! Configuration for broker behavior.

use std::time::Duration;

/// Default cap on announced payload sizes.
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Configuration for a [`Broker`](super::Broker).
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Period of the heartbeat broadcast to all direct peers.
    ///
    /// `None` (the default) disables heartbeats; liveness is then entirely
    /// the embedder's concern.
    pub heartbeat_interval: Option<Duration>,

    /// Timeout for outbound connection attempts.
    pub dial_timeout: Duration,

    /// Connections announcing a payload larger than this are dropped
    /// before the payload is read.
    pub max_payload_len: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: None,
            dial_timeout: Duration::from_secs(5),
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl BrokerConfig {
    /// Enable the heartbeat broadcast with the given period.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Cap announced payload sizes at `len` bytes.
    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Configuration tuned for low-latency local networks.
    pub fn local_network() -> Self {
        Self {
            heartbeat_interval: Some(Duration::from_secs(1)),
            dial_timeout: Duration::from_millis(500),
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }

    /// Configuration tuned for high-latency WAN links.
    pub fn wan_network() -> Self {
        Self {
            heartbeat_interval: Some(Duration::from_secs(10)),
            dial_timeout: Duration::from_secs(30),
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}
