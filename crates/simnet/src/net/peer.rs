use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::bandwidth::BandwidthBudget;
use super::header::Route;
use super::reliable::ConfirmationId;
use super::tracking::{ReceiptWindow, RttEstimator};
use crate::error::NetError;

pub const DEFAULT_MAX_PEERS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PeerId(pub u16);

impl PeerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

#[derive(Debug)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub group_mask: u32,
    pub last_seen: Instant,
    pub added_at: Instant,
    pub packets_sent: u64,
    pub packets_received: u64,
    incoming: BandwidthBudget,
    outgoing: BandwidthBudget,
    rtt: RttEstimator,
    receipts: ReceiptWindow,
}

impl PeerInfo {
    pub fn new(id: PeerId, addr: SocketAddr, incoming: u32, outgoing: u32, now: Instant) -> Self {
        Self {
            id,
            addr,
            group_mask: 0,
            last_seen: now,
            added_at: now,
            packets_sent: 0,
            packets_received: 0,
            incoming: BandwidthBudget::new(incoming, now),
            outgoing: BandwidthBudget::new(outgoing, now),
            rtt: RttEstimator::new(),
            receipts: ReceiptWindow::new(),
        }
    }

    pub fn incoming_bandwidth(&self) -> u32 {
        self.incoming.rate()
    }

    pub fn outgoing_bandwidth(&self) -> u32 {
        self.outgoing.rate()
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    /// Charges an outgoing datagram against the peer's budget. Packet
    /// counters are left to the caller, which knows whether the write
    /// reached the socket.
    pub fn try_send(&mut self, bytes: usize, now: Instant) -> bool {
        self.outgoing.try_consume(bytes, now)
    }

    pub fn try_receive(&mut self, bytes: usize, now: Instant) -> bool {
        self.incoming.try_consume(bytes, now)
    }

    pub fn record_rtt(&mut self, sample: Duration) {
        self.rtt.record(sample);
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn has_received(&self, id: ConfirmationId) -> bool {
        self.receipts.contains(id)
    }

    /// Returns `false` when this reliable packet was already delivered.
    pub fn record_receipt(&mut self, id: ConfirmationId) -> bool {
        self.receipts.record_received(id)
    }
}

/// Directly indexed table of active peers.
#[derive(Debug)]
pub struct ActivePeerList {
    slots: Vec<Option<PeerInfo>>,
    by_addr: HashMap<SocketAddr, PeerId>,
    count: usize,
}

impl ActivePeerList {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize + 1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            by_addr: HashMap::new(),
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Registers `id`, or updates the address and bandwidth budgets of an
    /// existing entry while keeping its liveness and RTT history.
    pub fn add_peer(
        &mut self,
        id: PeerId,
        addr: SocketAddr,
        incoming: u32,
        outgoing: u32,
        now: Instant,
    ) -> Result<(), NetError> {
        let capacity = self.capacity();
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return Err(NetError::PeerCapacity { id, capacity });
        };

        match slot {
            Some(peer) => {
                if peer.addr != addr {
                    self.by_addr.remove(&peer.addr);
                    peer.addr = addr;
                }
                peer.incoming.set_rate(incoming, now);
                peer.outgoing.set_rate(outgoing, now);
            }
            None => {
                *slot = Some(PeerInfo::new(id, addr, incoming, outgoing, now));
                self.count += 1;
            }
        }

        if let Some(previous) = self.by_addr.insert(addr, id) {
            if previous != id {
                log::warn!("{} now owns {}, previously {}", id, addr, previous);
            }
        }
        Ok(())
    }

    pub fn remove_peer(&mut self, id: PeerId) -> Option<PeerInfo> {
        let peer = self.slots.get_mut(id.index())?.take()?;
        if self.by_addr.get(&peer.addr) == Some(&id) {
            self.by_addr.remove(&peer.addr);
        }
        self.count -= 1;
        Some(peer)
    }

    pub fn lookup(&self, id: PeerId) -> Option<&PeerInfo> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn lookup_mut(&mut self, id: PeerId) -> Option<&mut PeerInfo> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    pub fn lookup_addr(&self, addr: &SocketAddr) -> Option<PeerId> {
        self.by_addr.get(addr).copied()
    }

    pub fn set_group_mask(&mut self, id: PeerId, mask: u32) -> bool {
        match self.lookup_mut(id) {
            Some(peer) => {
                peer.group_mask = mask;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerInfo> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerInfo> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Destination peers for a route, in ascending id order.
    pub fn resolve(&self, route: Route) -> Vec<PeerId> {
        match route {
            Route::Peer(id) => self.lookup(id).map(|peer| vec![peer.id]).unwrap_or_default(),
            Route::Broadcast => self.iter().map(|peer| peer.id).collect(),
            Route::Group(mask) => self
                .iter()
                .filter(|peer| peer.group_mask & mask != 0)
                .map(|peer| peer.id)
                .collect(),
        }
    }

    /// Removes and returns every peer silent for longer than `timeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        let timed_out: Vec<PeerId> = self
            .iter()
            .filter(|peer| peer.is_timed_out(now, timeout))
            .map(|peer| peer.id)
            .collect();

        for id in &timed_out {
            self.remove_peer(*id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_add_and_lookup() {
        let now = Instant::now();
        let mut peers = ActivePeerList::new(DEFAULT_MAX_PEERS);

        peers.add_peer(PeerId(7), addr(7000), 1000, 2000, now).unwrap();

        let peer = peers.lookup(PeerId(7)).unwrap();
        assert_eq!(peer.addr, addr(7000));
        assert_eq!(peer.incoming_bandwidth(), 1000);
        assert_eq!(peer.outgoing_bandwidth(), 2000);
        assert_eq!(peers.lookup_addr(&addr(7000)), Some(PeerId(7)));
        assert!(peers.lookup(PeerId(8)).is_none());
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_id_beyond_capacity() {
        let now = Instant::now();
        let mut peers = ActivePeerList::new(16);

        let result = peers.add_peer(PeerId(16), addr(1), 0, 0, now);
        assert!(matches!(result, Err(NetError::PeerCapacity { capacity: 16, .. })));
        assert!(peers.lookup(PeerId(4000)).is_none());
        assert!(peers.remove_peer(PeerId(4000)).is_none());
    }

    #[test]
    fn test_replace_updates_address_and_budget() {
        let now = Instant::now();
        let mut peers = ActivePeerList::new(16);

        peers.add_peer(PeerId(2), addr(2000), 100, 100, now).unwrap();
        peers.lookup_mut(PeerId(2)).unwrap().record_rtt(Duration::from_millis(30));
        peers.add_peer(PeerId(2), addr(2001), 500, 0, now).unwrap();

        let peer = peers.lookup(PeerId(2)).unwrap();
        assert_eq!(peer.addr, addr(2001));
        assert_eq!(peer.incoming_bandwidth(), 500);
        assert_eq!(peer.outgoing_bandwidth(), 0);
        assert_eq!(peer.rtt().samples(), 1);
        assert_eq!(peers.lookup_addr(&addr(2000)), None);
        assert_eq!(peers.lookup_addr(&addr(2001)), Some(PeerId(2)));
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_remove_is_isolated() {
        let now = Instant::now();
        let mut peers = ActivePeerList::new(16);
        peers.add_peer(PeerId(1), addr(1001), 0, 0, now).unwrap();
        peers.add_peer(PeerId(2), addr(1002), 0, 0, now).unwrap();

        assert!(peers.remove_peer(PeerId(1)).is_some());
        assert!(peers.remove_peer(PeerId(1)).is_none());

        assert!(peers.lookup(PeerId(1)).is_none());
        assert_eq!(peers.lookup(PeerId(2)).unwrap().addr, addr(1002));
        assert_eq!(peers.lookup_addr(&addr(1002)), Some(PeerId(2)));
        assert_eq!(peers.resolve(Route::Broadcast), vec![PeerId(2)]);
    }

    #[test]
    fn test_resolve_routes() {
        let now = Instant::now();
        let mut peers = ActivePeerList::new(16);
        for id in 1..=3 {
            peers.add_peer(PeerId(id), addr(1000 + id), 0, 0, now).unwrap();
        }
        peers.set_group_mask(PeerId(1), 0b01);
        peers.set_group_mask(PeerId(3), 0b11);

        assert_eq!(peers.resolve(Route::Peer(PeerId(2))), vec![PeerId(2)]);
        assert!(peers.resolve(Route::Peer(PeerId(9))).is_empty());
        assert_eq!(
            peers.resolve(Route::Broadcast),
            vec![PeerId(1), PeerId(2), PeerId(3)]
        );
        assert_eq!(peers.resolve(Route::Group(0b10)), vec![PeerId(3)]);
        assert_eq!(peers.resolve(Route::Group(0b01)), vec![PeerId(1), PeerId(3)]);
    }

    #[test]
    fn test_expire_silent_peers() {
        let now = Instant::now();
        let mut peers = ActivePeerList::new(16);
        peers.add_peer(PeerId(1), addr(1001), 0, 0, now).unwrap();
        peers.add_peer(PeerId(2), addr(1002), 0, 0, now).unwrap();

        let later = now + Duration::from_secs(20);
        peers.lookup_mut(PeerId(2)).unwrap().touch(later);

        let expired = peers.expire(later + Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(expired, vec![PeerId(1)]);
        assert!(peers.lookup(PeerId(2)).is_some());
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_budget_checks_leave_counters_alone() {
        let now = Instant::now();
        let mut peer = PeerInfo::new(PeerId(1), addr(1), 1000, 1000, now);

        assert!(peer.try_send(600, now));
        assert!(!peer.try_send(600, now));
        assert!(peer.try_receive(600, now));
        assert!(!peer.try_receive(600, now));
        assert_eq!(peer.packets_sent, 0);
        assert_eq!(peer.packets_received, 0);
    }
}
