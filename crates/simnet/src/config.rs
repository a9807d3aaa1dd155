use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::{DEFAULT_MAX_PEERS, MAX_PAYLOAD_SIZE, PeerId, RetryPolicy};

/// Tunables for one [`NetworkInterface`](crate::net::NetworkInterface).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Written as the source of every outgoing header.
    pub local_id: PeerId,
    pub max_peers: usize,
    pub max_payload: usize,
    /// Ring size in bytes for each of the eight lanes.
    pub queue_capacity: usize,
    pub drop_fraction: f32,
    pub retry: RetryPolicy,
    pub peer_timeout: Duration,
    pub accept_unknown_peers: bool,
    /// Bytes per second, 0 for unlimited.
    pub default_incoming_bandwidth: u32,
    pub default_outgoing_bandwidth: u32,
    pub max_datagrams_per_poll: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            local_id: PeerId(0),
            max_peers: DEFAULT_MAX_PEERS,
            max_payload: MAX_PAYLOAD_SIZE,
            queue_capacity: 64 * 1024,
            drop_fraction: 0.25,
            retry: RetryPolicy::default(),
            peer_timeout: Duration::from_secs(30),
            accept_unknown_peers: false,
            default_incoming_bandwidth: 0,
            default_outgoing_bandwidth: 0,
            max_datagrams_per_poll: 256,
        }
    }
}

impl NetworkConfig {
    pub fn with_local_id(mut self, id: PeerId) -> Self {
        self.local_id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.max_payload, 500);
        assert_eq!(config.max_peers, 4096);
        assert_eq!(config.retry.cap, Duration::from_secs(8));
        assert_eq!(config.retry.max_attempts, 10);
        assert!(!config.accept_unknown_peers);
    }
}
