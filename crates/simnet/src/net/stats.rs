use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Datagrams rejected for malformed headers, undecodable payloads or
    /// unauthorized senders.
    pub packets_bad: u64,
    /// Entries shed from a Tx or Rx lane.
    pub packets_dropped: u64,
    pub packets_throttled: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_resent: u64,
    pub packets_acked: u64,
    pub packets_abandoned: u64,
    pub pings_sent: u64,
    pub pongs_received: u64,
}

impl NetworkStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Resends as a share of all packets sent, in percent.
    pub fn resend_percent(&self) -> f32 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.packets_resent as f32 / self.packets_sent as f32 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_counters() {
        let mut stats = NetworkStats {
            packets_sent: 10,
            packets_bad: 2,
            pongs_received: 1,
            ..Default::default()
        };
        stats.reset();
        assert_eq!(stats, NetworkStats::default());
    }

    #[test]
    fn test_resend_percent() {
        let stats = NetworkStats {
            packets_sent: 20,
            packets_resent: 5,
            ..Default::default()
        };
        assert_eq!(stats.resend_percent(), 25.0);
        assert_eq!(NetworkStats::default().resend_percent(), 0.0);
    }
}
