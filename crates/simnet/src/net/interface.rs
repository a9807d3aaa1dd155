use std::io;
use std::mem;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use super::dispatch::{
    HandlerId, HandlerSet, Message, MessageHandler, PacketDecoder, PacketSource, RecordDecoder,
    Reliability,
};
use super::header::{
    Datagram, HeaderFlags, Priority, RECEIPT_HEADER_SIZE, Route, WireHeader, encode_datagram,
    write_datagram,
};
use super::peer::{ActivePeerList, PeerId, PeerInfo};
use super::reliable::{ConfirmationId, ReliablePacket, ReliableScheduler};
use super::stats::NetworkStats;
use super::transport::{Transport, UdpTransport};
use crate::config::NetworkConfig;
use crate::error::{CodecError, NetError};
use crate::queue::PacketQueue;
use crate::record::{
    ACK_ID, PING_ID, PONG_ID, Ping, Pong, RESERVED_MESSAGE_IDS, Record, RecordCodec,
    RecordRegistry, TagReader, TagWriter, TaggedRecord,
};

const LANES: usize = Priority::ALL.len();
const MAX_RECV_SLEEP: Duration = Duration::from_millis(1);

/// Drives one local endpoint: four prioritized Tx and Rx lanes, the peer
/// table, reliable resend scheduling and message dispatch.
///
/// Single-threaded. The host calls [`process_incoming`](Self::process_incoming)
/// then [`process_outgoing`](Self::process_outgoing) once per tick.
pub struct NetworkInterface<T: Transport = UdpTransport> {
    config: NetworkConfig,
    transport: Option<T>,
    codec: RecordCodec,
    peers: ActivePeerList,
    tx: [PacketQueue; LANES],
    rx: [PacketQueue; LANES],
    reliable: ReliableScheduler,
    source: Option<Box<dyn PacketSource>>,
    decoder: Box<dyn PacketDecoder>,
    handlers: HandlerSet,
    stats: NetworkStats,
    abandoned: Vec<(ConfirmationId, PeerId)>,
    recv_buffer: Vec<u8>,
    payload_buffer: Vec<u8>,
    ping_nonce: u32,
    epoch: Instant,
}

impl NetworkInterface<UdpTransport> {
    pub fn new(config: NetworkConfig, registry: &RecordRegistry) -> Self {
        Self::unbound(config, registry)
    }

    /// Binds the UDP socket. On failure the interface stays uninitialized
    /// and may be initialized again.
    pub fn initialize(&mut self, addr: SocketAddr) -> Result<SocketAddr, NetError> {
        let transport = UdpTransport::bind(addr).map_err(|source| {
            log::error!("Failed to bind {}: {}", addr, source);
            NetError::Bind { addr, source }
        })?;
        Ok(self.attach(transport))
    }
}

impl<T: Transport> NetworkInterface<T> {
    pub fn with_transport(config: NetworkConfig, registry: &RecordRegistry, transport: T) -> Self {
        let mut interface = Self::unbound(config, registry);
        interface.attach(transport);
        interface
    }

    fn unbound(config: NetworkConfig, registry: &RecordRegistry) -> Self {
        let lane = || PacketQueue::new(config.queue_capacity, config.drop_fraction);
        Self {
            codec: RecordCodec::new(registry),
            peers: ActivePeerList::new(config.max_peers),
            tx: std::array::from_fn(|_| lane()),
            rx: std::array::from_fn(|_| lane()),
            reliable: ReliableScheduler::new(config.retry.clone()),
            source: None,
            decoder: Box::new(RecordDecoder),
            handlers: HandlerSet::new(),
            stats: NetworkStats::default(),
            abandoned: Vec::new(),
            recv_buffer: vec![0u8; RECEIPT_HEADER_SIZE + config.max_payload],
            payload_buffer: vec![0u8; config.max_payload],
            ping_nonce: 0,
            epoch: Instant::now(),
            transport: None,
            config,
        }
    }

    /// Installs `transport`, replacing any previous one.
    pub fn attach(&mut self, transport: T) -> SocketAddr {
        let addr = transport.local_addr();
        log::info!("{} listening on {}", self.config.local_id, addr);
        self.transport = Some(transport);
        addr
    }

    pub fn is_initialized(&self) -> bool {
        self.transport.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().map(Transport::local_addr)
    }

    pub fn local_id(&self) -> PeerId {
        self.config.local_id
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    /// Closes the transport and discards everything queued or awaiting
    /// confirmation. Peers and handlers are kept.
    pub fn shutdown(&mut self) {
        if self.transport.take().is_some() {
            log::info!("{} shut down", self.config.local_id);
        }
        for lane in self.tx.iter_mut().chain(self.rx.iter_mut()) {
            lane.clear();
        }
        self.reliable.clear();
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut RecordCodec {
        &mut self.codec
    }

    pub fn peers(&self) -> &ActivePeerList {
        &self.peers
    }

    pub fn peer(&self, id: PeerId) -> Option<&PeerInfo> {
        self.peers.lookup(id)
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn tx_depth(&self, priority: Priority) -> usize {
        self.tx[priority.lane()].depth()
    }

    pub fn rx_depth(&self, priority: Priority) -> usize {
        self.rx[priority.lane()].depth()
    }

    pub fn reliable_outstanding(&self) -> usize {
        self.reliable.len()
    }

    pub fn reliable_packet(&self, id: ConfirmationId) -> Option<&ReliablePacket> {
        self.reliable.get(id)
    }

    /// Reliable packets given up since the last call, oldest first.
    pub fn drain_abandoned(&mut self) -> Vec<(ConfirmationId, PeerId)> {
        mem::take(&mut self.abandoned)
    }

    pub fn add_peer(
        &mut self,
        id: PeerId,
        addr: SocketAddr,
        incoming_bandwidth: u32,
        outgoing_bandwidth: u32,
    ) -> Result<(), NetError> {
        let known = self.peers.lookup(id).is_some();
        self.peers
            .add_peer(id, addr, incoming_bandwidth, outgoing_bandwidth, Instant::now())?;
        if !known {
            log::info!("Added {} at {}", id, addr);
        }
        Ok(())
    }

    /// Unregisters `id` and abandons every reliable packet addressed to it.
    pub fn remove_peer(&mut self, id: PeerId) -> bool {
        let Some(peer) = self.peers.remove_peer(id) else {
            return false;
        };
        log::info!("Removed {} at {}", id, peer.addr);
        self.abandon_peer_packets(id);
        true
    }

    pub fn set_peer_groups(&mut self, id: PeerId, mask: u32) -> bool {
        self.peers.set_group_mask(id, mask)
    }

    pub fn set_packet_source<S: PacketSource + 'static>(&mut self, source: S) {
        self.source = Some(Box::new(source));
    }

    pub fn clear_packet_source(&mut self) {
        self.source = None;
    }

    pub fn set_packet_decoder<D: PacketDecoder + 'static>(&mut self, decoder: D) {
        self.decoder = Box::new(decoder);
    }

    pub fn add_packet_handler<H: MessageHandler + 'static>(&mut self, handler: H) -> HandlerId {
        self.handlers.add(Box::new(handler))
    }

    pub fn remove_packet_handler(&mut self, id: HandlerId) -> bool {
        self.handlers.remove(id)
    }

    /// Encodes `record` and queues it on the lane for `priority`.
    ///
    /// Reliable sends are split into one unicast packet per recipient and
    /// return their confirmation ids. A full lane fails an unreliable send
    /// with [`NetError::QueueFull`]; reliable packets stay scheduled and are
    /// retried.
    pub fn send(
        &mut self,
        record: &dyn TaggedRecord,
        route: Route,
        priority: Priority,
        reliability: Reliability,
    ) -> Result<Vec<ConfirmationId>, NetError> {
        let message_id = self
            .codec
            .local_id(record.record_type())
            .ok_or(CodecError::UnregisteredType(record.record_type()))?;

        let mut header = WireHeader::new(message_id, self.config.local_id, route, priority);
        if reliability == Reliability::Reliable {
            header.flags = HeaderFlags::RELIABLE;
        }

        let mut payload = mem::take(&mut self.payload_buffer);
        let result = self
            .codec
            .encode(record, &mut payload)
            .map_err(NetError::from)
            .and_then(|len| self.enqueue(header, &payload[..len], Instant::now()));
        self.payload_buffer = payload;
        result
    }

    /// Sends a ping on the critical lane. The answer refreshes the peer's
    /// RTT estimate.
    pub fn ping_peer(&mut self, peer: PeerId) -> Result<(), NetError> {
        if self.peers.lookup(peer).is_none() {
            return Err(NetError::UnknownPeer(peer));
        }
        self.ping_nonce = self.ping_nonce.wrapping_add(1);
        let ping = Ping {
            nonce: self.ping_nonce,
            sent_micros: self.elapsed_micros(),
        };
        self.send_control(PING_ID, &ping, peer)?;
        self.stats.pings_sent += 1;
        log::debug!("Ping {} to {}", ping.nonce, peer);
        Ok(())
    }

    /// Pulls from the packet source, queues due resends, then drains the Tx
    /// lanes highest priority first until `timeout` has elapsed. Whatever a
    /// lane still holds afterwards is shed by its drop fraction.
    ///
    /// Returns the number of datagrams written to the transport.
    pub fn process_outgoing(&mut self, timeout: Duration) -> Result<usize, NetError> {
        if self.transport.is_none() {
            return Err(NetError::NotInitialized);
        }
        let start = Instant::now();
        let deadline = start + timeout;

        self.pull_from_source(start);
        self.service_reliable(start);

        let mut sent = 0;
        'lanes: for lane in 0..LANES {
            loop {
                let now = Instant::now();
                if sent > 0 && now >= deadline {
                    break 'lanes;
                }
                let Some(transport) = self.transport.as_mut() else {
                    break 'lanes;
                };
                let Some(entry) = self.tx[lane].front() else {
                    break;
                };
                sent += transmit(
                    transport,
                    &mut self.peers,
                    &mut self.stats,
                    entry,
                    self.config.max_payload,
                    now,
                );
                self.tx[lane].release_read();
            }
        }

        for lane in &mut self.tx {
            self.stats.packets_dropped += lane.drop_oldest() as u64;
        }

        Ok(sent)
    }

    /// Polls the transport for up to `timeout`, returning as soon as
    /// something has arrived. Queued messages are then decoded and
    /// dispatched highest priority first for up to another `timeout`, and
    /// each Rx lane sheds what is left. Malformed or unauthorized datagrams
    /// are counted as bad and dropped. Finally evicts silent peers.
    ///
    /// Returns the number of messages handed to the handlers.
    pub fn process_incoming(&mut self, timeout: Duration) -> Result<usize, NetError> {
        if self.transport.is_none() {
            return Err(NetError::NotInitialized);
        }
        let deadline = Instant::now() + timeout;

        let mut buf = mem::take(&mut self.recv_buffer);
        let mut received = 0;
        while received < self.config.max_datagrams_per_poll {
            let Some(transport) = self.transport.as_mut() else {
                break;
            };
            match transport.recv_from(&mut buf) {
                Ok((len, from)) => {
                    received += 1;
                    self.handle_datagram(&buf[..len], from, Instant::now());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if received > 0 || now >= deadline {
                        break;
                    }
                    thread::sleep(MAX_RECV_SLEEP.min(deadline - now));
                }
                // ICMP unreachable from a departed peer surfaces as a reset.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Receive failed: {}", e);
                    break;
                }
            }
        }
        self.recv_buffer = buf;

        let dispatched = self.dispatch_lanes(Instant::now() + timeout);

        let now = Instant::now();
        for id in self.peers.expire(now, self.config.peer_timeout) {
            log::info!("{} timed out", id);
            self.abandon_peer_packets(id);
        }

        Ok(dispatched)
    }

    fn handle_datagram(&mut self, data: &[u8], from: SocketAddr, now: Instant) {
        let datagram = match Datagram::parse(data, self.config.max_payload) {
            Ok(datagram) => datagram,
            Err(e) => {
                self.stats.packets_bad += 1;
                log::warn!("Bad datagram from {}: {}", from, e);
                return;
            }
        };
        let header = datagram.header;
        let peer_id = header.source;

        if !self.authorize(peer_id, from, now) {
            self.stats.packets_bad += 1;
            return;
        }
        let Some(peer) = self.peers.lookup_mut(peer_id) else {
            return;
        };
        peer.touch(now);
        if !peer.try_receive(data.len(), now) {
            self.stats.packets_throttled += 1;
            log::debug!("Throttled {} bytes from {}", data.len(), peer_id);
            return;
        }
        peer.packets_received += 1;
        self.stats.packets_received += 1;
        self.stats.bytes_received += data.len() as u64;

        if header.flags.contains(HeaderFlags::ACK) {
            if let Some(id) = datagram.confirmation_id {
                if self.reliable.confirm(id, peer_id).is_some() {
                    self.stats.packets_acked += 1;
                    log::debug!("{} confirmed {:?}", peer_id, id);
                } else {
                    log::debug!("Stale ack {:?} from {}", id, peer_id);
                }
            }
            return;
        }

        let receipt = reliable_receipt(&header, datagram.confirmation_id);
        if let Some(id) = receipt {
            if self.peers.lookup(peer_id).is_some_and(|peer| peer.has_received(id)) {
                log::debug!("Duplicate {:?} from {}", id, peer_id);
                self.queue_ack(peer_id, id);
                return;
            }
        }

        if header.message_id < RESERVED_MESSAGE_IDS
            && self.handle_control(&header, datagram.payload, now)
        {
            if let Some(id) = receipt {
                acknowledge(
                    &mut self.peers,
                    &mut self.tx[Priority::Critical.lane()],
                    self.config.local_id,
                    peer_id,
                    id,
                );
            }
            return;
        }

        // Reliable packets are acknowledged at dispatch, so one lost to a
        // full or shedding lane is resent by its sender.
        if !self.rx[header.priority.lane()].push(data) {
            self.stats.packets_dropped += 1;
            log::warn!("{:?} receive lane full, dropping packet from {}", header.priority, peer_id);
        }
    }

    /// Known peers must send from their registered address. Unknown peers
    /// are registered on first contact only when configured to.
    fn authorize(&mut self, id: PeerId, from: SocketAddr, now: Instant) -> bool {
        match self.peers.lookup(id) {
            Some(peer) if peer.addr == from => true,
            Some(peer) => {
                log::warn!("{} claimed by {}, registered at {}", id, from, peer.addr);
                false
            }
            None if self.config.accept_unknown_peers => {
                match self.peers.add_peer(
                    id,
                    from,
                    self.config.default_incoming_bandwidth,
                    self.config.default_outgoing_bandwidth,
                    now,
                ) {
                    Ok(()) => {
                        log::info!("Accepted {} at {}", id, from);
                        true
                    }
                    Err(e) => {
                        log::warn!("Rejected {}: {}", from, e);
                        false
                    }
                }
            }
            None => {
                log::warn!("Datagram from unregistered {} at {}", id, from);
                false
            }
        }
    }

    /// Handles ping and pong inline. Other reserved ids fall through to the
    /// decoder.
    fn handle_control(&mut self, header: &WireHeader, payload: &[u8], now: Instant) -> bool {
        match header.message_id {
            PING_ID => {
                let mut ping = Ping::default();
                if let Err(e) = ping.read_fields(&mut TagReader::new(payload)) {
                    self.stats.packets_bad += 1;
                    log::warn!("Malformed ping from {}: {}", header.source, e);
                    return true;
                }
                if let Err(e) = self.send_control(PONG_ID, &Pong::answer(&ping), header.source) {
                    log::warn!("Could not answer ping from {}: {}", header.source, e);
                }
                true
            }
            PONG_ID => {
                let mut pong = Pong::default();
                if let Err(e) = pong.read_fields(&mut TagReader::new(payload)) {
                    self.stats.packets_bad += 1;
                    log::warn!("Malformed pong from {}: {}", header.source, e);
                    return true;
                }
                self.stats.pongs_received += 1;
                let rtt = Duration::from_micros(self.micros_at(now).saturating_sub(pong.sent_micros));
                if let Some(peer) = self.peers.lookup_mut(header.source) {
                    peer.record_rtt(rtt);
                    log::debug!(
                        "Pong {} from {}: rtt {:?}, srtt {:.1}ms",
                        pong.nonce,
                        header.source,
                        rtt,
                        peer.rtt().srtt_ms()
                    );
                }
                true
            }
            _ => false,
        }
    }

    fn dispatch_lanes(&mut self, deadline: Instant) -> usize {
        let mut dispatched = 0;
        'lanes: for lane in 0..LANES {
            loop {
                if dispatched > 0 && Instant::now() >= deadline {
                    break 'lanes;
                }
                let Some(entry) = self.rx[lane].front() else {
                    break;
                };
                match Datagram::parse(entry, self.config.max_payload) {
                    Ok(datagram) => {
                        let header = &datagram.header;
                        let fresh = match reliable_receipt(header, datagram.confirmation_id) {
                            Some(id) => acknowledge(
                                &mut self.peers,
                                &mut self.tx[Priority::Critical.lane()],
                                self.config.local_id,
                                header.source,
                                id,
                            ),
                            None => true,
                        };
                        if !fresh {
                            self.rx[lane].release_read();
                            continue;
                        }
                        match self.decoder.decode(&self.codec, header, datagram.payload) {
                            Ok(record) => {
                                self.handlers.dispatch(&Message {
                                    header,
                                    record: record.as_ref(),
                                });
                                dispatched += 1;
                            }
                            Err(CodecError::UnknownMessageId(id)) => {
                                self.stats.packets_bad += 1;
                                log::error!("No record bound to message id {} from {}", id, header.source);
                            }
                            Err(e) => {
                                self.stats.packets_bad += 1;
                                log::warn!(
                                    "Failed to decode message {} from {}: {}",
                                    header.message_id,
                                    header.source,
                                    e
                                );
                            }
                        }
                    }
                    Err(e) => {
                        self.stats.packets_bad += 1;
                        log::warn!("Corrupt receive lane entry: {}", e);
                    }
                }
                self.rx[lane].release_read();
            }
        }

        for lane in &mut self.rx {
            self.stats.packets_dropped += lane.drop_oldest() as u64;
        }
        dispatched
    }

    fn pull_from_source(&mut self, now: Instant) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        let mut payload = mem::take(&mut self.payload_buffer);

        for _ in 0..self.config.max_datagrams_per_poll {
            let mut header = WireHeader {
                source: self.config.local_id,
                ..WireHeader::default()
            };
            let Some(len) = source.get_packet(&self.codec, &mut header, &mut payload) else {
                break;
            };
            if let Err(e) = self.enqueue(header, &payload[..len.min(payload.len())], now) {
                log::warn!("Dropped packet from source: {}", e);
            }
        }

        self.payload_buffer = payload;
        self.source = Some(source);
    }

    fn service_reliable(&mut self, now: Instant) {
        let outcome = self.reliable.service(now);

        for id in outcome.resend {
            let Some(packet) = self.reliable.get(id) else {
                continue;
            };
            if self.tx[packet.priority().lane()].push(packet.payload()) {
                self.stats.packets_resent += 1;
                log::debug!(
                    "Resending {:?} to {} (attempt {})",
                    id,
                    packet.peer(),
                    packet.attempts()
                );
            } else {
                log::warn!("{:?} transmit lane full, resend of {:?} deferred", packet.priority(), id);
            }
        }

        for packet in outcome.abandoned {
            self.record_abandoned(&packet);
        }
    }

    fn abandon_peer_packets(&mut self, peer: PeerId) {
        for packet in self.reliable.abandon_peer(peer) {
            self.record_abandoned(&packet);
        }
    }

    fn record_abandoned(&mut self, packet: &ReliablePacket) {
        log::info!(
            "Abandoned {:?} to {} after {} attempts",
            packet.id(),
            packet.peer(),
            packet.attempts()
        );
        self.stats.packets_abandoned += 1;
        self.abandoned.push((packet.id(), packet.peer()));
    }

    /// Queues an encoded payload. The header's source is overwritten and
    /// its flags decide the delivery mode.
    fn enqueue(
        &mut self,
        mut header: WireHeader,
        payload: &[u8],
        now: Instant,
    ) -> Result<Vec<ConfirmationId>, NetError> {
        if payload.len() > self.config.max_payload {
            return Err(NetError::PayloadTooLarge {
                len: payload.len(),
                max: self.config.max_payload,
            });
        }
        header.source = self.config.local_id;
        let lane = header.priority.lane();
        let route = header.route();
        if let Route::Peer(id) = route {
            if self.peers.lookup(id).is_none() {
                return Err(NetError::UnknownPeer(id));
            }
        }

        if !header.flags.contains(HeaderFlags::RELIABLE) {
            header.flags = HeaderFlags::empty();
            let queue = &mut self.tx[lane];
            let slot = queue
                .reserve_write(header.encoded_len() + payload.len())
                .ok_or(NetError::QueueFull(header.priority))?;
            let len = write_datagram(slot, &header, None, payload)?;
            queue.commit_write(len);
            return Ok(Vec::new());
        }

        let recipients = self.peers.resolve(route);
        header.flags = HeaderFlags::RELIABLE;
        let mut ids = Vec::with_capacity(recipients.len());
        for peer in recipients {
            let id = self.reliable.next_confirmation_id();
            header.set_route(Route::Peer(peer));
            let datagram = encode_datagram(&header, Some(id), payload)?;
            if !self.tx[lane].push(&datagram) {
                log::warn!("{:?} transmit lane full, {:?} waits for retry", header.priority, id);
            }
            self.reliable.track(id, peer, header.priority, datagram, now);
            ids.push(id);
        }
        Ok(ids)
    }

    fn queue_ack(&mut self, peer: PeerId, id: ConfirmationId) {
        write_ack(&mut self.tx[Priority::Critical.lane()], self.config.local_id, peer, id);
    }

    fn send_control<R: Record>(&mut self, message_id: u16, record: &R, peer: PeerId) -> Result<(), NetError> {
        let mut payload = [0u8; 64];
        let mut writer = TagWriter::new(&mut payload);
        record.write_fields(&mut writer)?;
        let len = writer.position();

        let header = WireHeader::new(message_id, self.config.local_id, Route::Peer(peer), Priority::Critical);
        self.enqueue(header, &payload[..len], Instant::now())?;
        Ok(())
    }

    fn elapsed_micros(&self) -> u64 {
        self.micros_at(Instant::now())
    }

    fn micros_at(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_micros() as u64
    }
}

/// The confirmation id of a reliable data packet. Acks carry one too but
/// are never acknowledged themselves.
fn reliable_receipt(header: &WireHeader, id: Option<ConfirmationId>) -> Option<ConfirmationId> {
    id.filter(|_| header.flags.contains(HeaderFlags::RELIABLE))
}

/// Records a reliable delivery from `from` and queues its ack. Returns
/// `false` for a copy that was already delivered, which is acked again, or
/// when the sender is no longer a peer.
fn acknowledge(
    peers: &mut ActivePeerList,
    critical: &mut PacketQueue,
    local_id: PeerId,
    from: PeerId,
    id: ConfirmationId,
) -> bool {
    let Some(peer) = peers.lookup_mut(from) else {
        log::debug!("{:?} from departed {} left unacknowledged", id, from);
        return false;
    };
    let fresh = peer.record_receipt(id);
    if !fresh {
        log::debug!("Duplicate {:?} from {}", id, from);
    }
    write_ack(critical, local_id, from, id);
    fresh
}

fn write_ack(queue: &mut PacketQueue, local_id: PeerId, peer: PeerId, id: ConfirmationId) {
    let mut header = WireHeader::new(ACK_ID, local_id, Route::Peer(peer), Priority::Critical);
    header.flags = HeaderFlags::ACK;

    let Some(slot) = queue.reserve_write(header.encoded_len()) else {
        log::warn!("Critical lane full, ack {:?} to {} dropped", id, peer);
        return;
    };
    match write_datagram(slot, &header, Some(id), &[]) {
        Ok(len) => {
            queue.commit_write(len);
        }
        Err(e) => log::warn!("Failed to write ack {:?}: {}", id, e),
    }
}

/// Writes one queued datagram to every peer its route resolves to and
/// returns how many copies went out.
fn transmit<T: Transport>(
    transport: &mut T,
    peers: &mut ActivePeerList,
    stats: &mut NetworkStats,
    data: &[u8],
    max_payload: usize,
    now: Instant,
) -> usize {
    let route = match Datagram::parse(data, max_payload) {
        Ok(datagram) => datagram.header.route(),
        Err(e) => {
            stats.packets_dropped += 1;
            log::warn!("Corrupt transmit lane entry: {}", e);
            return 0;
        }
    };

    let recipients = peers.resolve(route);
    if recipients.is_empty() {
        if let Route::Peer(id) = route {
            stats.packets_dropped += 1;
            log::debug!("Dropping packet for unknown {}", id);
        }
        return 0;
    }

    let mut sent = 0;
    for id in recipients {
        let Some(peer) = peers.lookup_mut(id) else {
            continue;
        };
        if !peer.try_send(data.len(), now) {
            stats.packets_throttled += 1;
            log::debug!("Throttled {} bytes to {}", data.len(), id);
            continue;
        }
        match transport.send_to(data, peer.addr) {
            Ok(bytes) => {
                peer.packets_sent += 1;
                stats.packets_sent += 1;
                stats.bytes_sent += bytes as u64;
                sent += 1;
            }
            Err(e) => {
                stats.packets_dropped += 1;
                log::warn!("Send to {} at {} failed: {}", id, peer.addr, e);
            }
        }
    }
    sent
}
