use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use simnet::net::{
    Message, MessageHandler, NetworkInterface, NetworkStats, PeerId, Priority, Reliability, Route,
};
use simnet::record::{RecordFactory, RecordRegistry};
use simnet::{NetError, NetworkConfig};

use crate::events::NodeEvent;
use crate::status::{STATUS_ID, Status};

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub tick_rate: u32,
    pub ping_interval: Duration,
    pub status_interval: Duration,
    pub label: Option<String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            ping_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(1),
            label: None,
        }
    }
}

/// Forwards every decoded record into the node's event queue.
struct EventHandler {
    events: Rc<RefCell<VecDeque<NodeEvent>>>,
}

impl MessageHandler for EventHandler {
    fn handle_message(&mut self, message: &Message<'_>) {
        let from = message.header.source;
        let event = match message.record.downcast_ref::<Status>() {
            Some(status) => NodeEvent::StatusReceived {
                from,
                tick: status.tick,
                peer_count: status.peer_count,
                label: status.label.clone(),
            },
            None => NodeEvent::MessageReceived {
                from,
                name: message.record.record_name(),
            },
        };
        self.events.borrow_mut().push_back(event);
    }
}

#[derive(Debug, Clone)]
pub struct NodeStats {
    pub local_id: PeerId,
    pub local_addr: Option<SocketAddr>,
    pub tick: u32,
    pub uptime_secs: u64,
    pub peer_count: usize,
    pub reliable_outstanding: usize,
    pub network: NetworkStats,
}

#[derive(Debug, Clone)]
pub struct PeerRow {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub srtt_ms: f32,
    pub rtt_var_ms: f32,
    pub rtt_samples: u32,
    pub idle_secs: f32,
    pub packets_sent: u64,
    pub packets_received: u64,
}

pub struct Node {
    interface: NetworkInterface,
    settings: NodeSettings,
    events: Rc<RefCell<VecDeque<NodeEvent>>>,
    known_peers: BTreeSet<PeerId>,
    tick: u32,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    last_ping: Instant,
    last_status: Instant,
    running: Arc<AtomicBool>,
    start_time: Instant,
}

impl Node {
    pub fn new(
        bind_addr: SocketAddr,
        config: NetworkConfig,
        settings: NodeSettings,
        peers: &[(PeerId, SocketAddr)],
    ) -> Result<Self, NetError> {
        let mut registry = RecordRegistry::with_control_records();
        registry.register_factory(RecordFactory::of::<Status>().with_custom_id(STATUS_ID));

        let incoming = config.default_incoming_bandwidth;
        let outgoing = config.default_outgoing_bandwidth;
        let mut interface = NetworkInterface::new(config, &registry);
        interface.initialize(bind_addr)?;
        for (id, addr) in peers {
            interface.add_peer(*id, *addr, incoming, outgoing)?;
        }

        let events = Rc::new(RefCell::new(VecDeque::new()));
        interface.add_packet_handler(EventHandler {
            events: Rc::clone(&events),
        });

        let tick_duration = Duration::from_secs_f64(1.0 / settings.tick_rate.max(1) as f64);
        let now = Instant::now();

        Ok(Self {
            known_peers: peers.iter().map(|(id, _)| *id).collect(),
            interface,
            settings,
            events,
            tick: 0,
            tick_duration,
            last_tick_time: now,
            accumulator: Duration::ZERO,
            last_ping: now,
            last_status: now,
            running: Arc::new(AtomicBool::new(true)),
            start_time: now,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.interface.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> Vec<NodeEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    /// Headless loop: ticks until stopped and logs every event.
    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.drain_events() {
                match event {
                    NodeEvent::Error { message } => log::error!("{}", message),
                    other if other.is_warning() => log::warn!("{}", other.describe()),
                    other => log::info!("{}", other.describe()),
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        self.interface.shutdown();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        if let Err(e) = self.interface.process_incoming(Duration::ZERO) {
            self.push_event(NodeEvent::Error {
                message: format!("Receive error: {}", e),
            });
        }

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick();
        }

        if let Err(e) = self.interface.process_outgoing(self.tick_duration / 2) {
            self.push_event(NodeEvent::Error {
                message: format!("Send error: {}", e),
            });
        }

        for (id, peer) in self.interface.drain_abandoned() {
            self.push_event(NodeEvent::Abandoned { id, peer });
        }
        self.track_membership();
    }

    fn tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        let now = Instant::now();

        if now.duration_since(self.last_ping) >= self.settings.ping_interval {
            self.last_ping = now;
            let peers: Vec<PeerId> = self.interface.peers().iter().map(|peer| peer.id).collect();
            for peer in peers {
                if let Err(e) = self.interface.ping_peer(peer) {
                    log::warn!("Ping to {} failed: {}", peer, e);
                }
            }
        }

        if now.duration_since(self.last_status) >= self.settings.status_interval {
            self.last_status = now;
            self.broadcast_status();
        }
    }

    fn broadcast_status(&mut self) {
        let status = Status {
            tick: self.tick,
            uptime_ms: self.start_time.elapsed().as_millis() as u64,
            peer_count: self.interface.peers().len() as u16,
            label: self.settings.label.clone(),
        };
        if let Err(e) = self.interface.send(
            &status,
            Route::Broadcast,
            Priority::Normal,
            Reliability::Unreliable,
        ) {
            log::warn!("Status broadcast failed: {}", e);
        }
    }

    fn track_membership(&mut self) {
        let current: BTreeSet<PeerId> = self.interface.peers().iter().map(|peer| peer.id).collect();
        for peer in current.difference(&self.known_peers) {
            self.events
                .borrow_mut()
                .push_back(NodeEvent::PeerJoined { peer: *peer });
        }
        for peer in self.known_peers.difference(&current) {
            self.events
                .borrow_mut()
                .push_back(NodeEvent::PeerLeft { peer: *peer });
        }
        self.known_peers = current;
    }

    fn push_event(&self, event: NodeEvent) {
        self.events.borrow_mut().push_back(event);
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            local_id: self.interface.local_id(),
            local_addr: self.interface.local_addr(),
            tick: self.tick,
            uptime_secs: self.start_time.elapsed().as_secs(),
            peer_count: self.interface.peers().len(),
            reliable_outstanding: self.interface.reliable_outstanding(),
            network: self.interface.stats().clone(),
        }
    }

    pub fn peer_rows(&self) -> Vec<PeerRow> {
        let now = Instant::now();
        self.interface
            .peers()
            .iter()
            .map(|peer| PeerRow {
                id: peer.id,
                addr: peer.addr,
                srtt_ms: peer.rtt().srtt_ms(),
                rtt_var_ms: peer.rtt().rtt_var_ms(),
                rtt_samples: peer.rtt().samples(),
                idle_secs: now.saturating_duration_since(peer.last_seen).as_secs_f32(),
                packets_sent: peer.packets_sent,
                packets_received: peer.packets_received,
            })
            .collect()
    }

    pub fn reset_stats(&mut self) {
        self.interface.reset_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_nodes_exchange_status() {
        let settings = NodeSettings {
            tick_rate: 100,
            ping_interval: Duration::from_millis(10),
            status_interval: Duration::from_millis(10),
            label: Some("alpha".into()),
        };
        let mut a = Node::new(
            loopback(),
            NetworkConfig {
                accept_unknown_peers: true,
                ..NetworkConfig::default().with_local_id(PeerId(1))
            },
            settings.clone(),
            &[],
        )
        .unwrap();
        let a_addr = a.local_addr().unwrap();
        let mut b = Node::new(
            loopback(),
            NetworkConfig::default().with_local_id(PeerId(2)),
            settings,
            &[(PeerId(1), a_addr)],
        )
        .unwrap();

        let mut a_events = Vec::new();
        let mut b_events = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            a.tick_once();
            b.tick_once();
            a_events.extend(a.drain_events());
            b_events.extend(b.drain_events());
            let a_heard = a_events
                .iter()
                .any(|e| matches!(e, NodeEvent::StatusReceived { from: PeerId(2), .. }));
            let b_heard = b_events
                .iter()
                .any(|e| matches!(e, NodeEvent::StatusReceived { from: PeerId(1), .. }));
            if a_heard && b_heard {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(
            a_events
                .iter()
                .any(|e| matches!(e, NodeEvent::PeerJoined { peer: PeerId(2) }))
        );
        assert!(a_events.iter().any(|e| matches!(
            e,
            NodeEvent::StatusReceived { from: PeerId(2), label: Some(label), .. } if label == "alpha"
        )));
        assert!(
            b_events
                .iter()
                .any(|e| matches!(e, NodeEvent::StatusReceived { from: PeerId(1), .. }))
        );
        assert_eq!(a.stats().peer_count, 1);
    }
}
