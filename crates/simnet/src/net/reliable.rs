use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::header::Priority;
use super::peer::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfirmationId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliableState {
    Pending,
    Retrying,
    Confirmed,
    Abandoned,
}

impl ReliableState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReliableState::Confirmed | ReliableState::Abandoned)
    }
}

/// Linear backoff: the n-th retry waits `min(cap, n * step)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_timeout: Duration,
    pub step: Duration,
    pub cap: Duration,
    /// Retries allowed before the packet is abandoned.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_secs(1),
            step: Duration::from_secs(1),
            cap: Duration::from_secs(8),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempts: u32) -> Duration {
        self.step.saturating_mul(attempts).min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub struct ReliablePacket {
    id: ConfirmationId,
    peer: PeerId,
    priority: Priority,
    state: ReliableState,
    attempts: u32,
    sent_at: Instant,
    next_retry_time: Instant,
    payload: Vec<u8>,
}

impl ReliablePacket {
    /// `payload` is the complete datagram, receipt header included.
    pub fn new(
        id: ConfirmationId,
        peer: PeerId,
        priority: Priority,
        payload: Vec<u8>,
        now: Instant,
        policy: &RetryPolicy,
    ) -> Self {
        Self {
            id,
            peer,
            priority,
            state: ReliableState::Pending,
            attempts: 0,
            sent_at: now,
            next_retry_time: now + policy.initial_timeout,
            payload,
        }
    }

    pub fn id(&self) -> ConfirmationId {
        self.id
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> ReliableState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }

    pub fn next_retry_time(&self) -> Instant {
        self.next_retry_time
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_due(&self, now: Instant) -> bool {
        !self.state.is_terminal() && now >= self.next_retry_time
    }

    /// Records one more retry and schedules the next. Terminal packets are
    /// left untouched.
    pub fn update_attempt(&mut self, now: Instant, policy: &RetryPolicy) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.attempts += 1;
        self.next_retry_time = now + policy.backoff(self.attempts);
        self.state = ReliableState::Retrying;
        true
    }

    /// Idempotent; an abandoned packet stays abandoned.
    pub fn confirm(&mut self) -> bool {
        match self.state {
            ReliableState::Pending | ReliableState::Retrying => {
                self.state = ReliableState::Confirmed;
                true
            }
            ReliableState::Confirmed | ReliableState::Abandoned => false,
        }
    }

    pub fn abandon(&mut self) {
        if self.state != ReliableState::Confirmed {
            self.state = ReliableState::Abandoned;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct RetryEntry {
    due: Instant,
    id: ConfirmationId,
}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug, Default)]
pub struct ServiceOutcome {
    /// Packets whose retry fell due, earliest first.
    pub resend: Vec<ConfirmationId>,
    pub abandoned: Vec<ReliablePacket>,
}

/// Outstanding reliable packets, serviced in `next_retry_time` order.
#[derive(Debug)]
pub struct ReliableScheduler {
    packets: HashMap<ConfirmationId, ReliablePacket>,
    schedule: BinaryHeap<RetryEntry>,
    next_id: u32,
    policy: RetryPolicy,
}

impl ReliableScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            packets: HashMap::new(),
            schedule: BinaryHeap::new(),
            next_id: 1,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Next id not held by an outstanding packet.
    pub fn next_confirmation_id(&mut self) -> ConfirmationId {
        loop {
            let id = ConfirmationId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !self.packets.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn track(
        &mut self,
        id: ConfirmationId,
        peer: PeerId,
        priority: Priority,
        payload: Vec<u8>,
        now: Instant,
    ) {
        let packet = ReliablePacket::new(id, peer, priority, payload, now, &self.policy);
        self.schedule.push(RetryEntry {
            due: packet.next_retry_time(),
            id,
        });
        self.packets.insert(id, packet);
    }

    /// Confirms and retires the packet acknowledged by `from`. Acks from any
    /// other peer are ignored.
    pub fn confirm(&mut self, id: ConfirmationId, from: PeerId) -> Option<ReliablePacket> {
        if self.packets.get(&id)?.peer() != from {
            return None;
        }
        let mut packet = self.packets.remove(&id)?;
        packet.confirm();
        Some(packet)
    }

    /// Pops every packet due at `now`, bumping its attempt count or
    /// abandoning it once `max_attempts` retries have been spent.
    pub fn service(&mut self, now: Instant) -> ServiceOutcome {
        let mut outcome = ServiceOutcome::default();

        while let Some(entry) = self.schedule.peek() {
            if entry.due > now {
                break;
            }
            let Some(entry) = self.schedule.pop() else {
                break;
            };
            let Some(packet) = self.packets.get_mut(&entry.id) else {
                continue;
            };
            if packet.next_retry_time() != entry.due {
                continue;
            }

            if packet.attempts() >= self.policy.max_attempts {
                if let Some(mut packet) = self.packets.remove(&entry.id) {
                    packet.abandon();
                    outcome.abandoned.push(packet);
                }
                continue;
            }

            packet.update_attempt(now, &self.policy);
            self.schedule.push(RetryEntry {
                due: packet.next_retry_time(),
                id: entry.id,
            });
            outcome.resend.push(entry.id);
        }

        outcome
    }

    /// Abandons everything addressed to `peer`.
    pub fn abandon_peer(&mut self, peer: PeerId) -> Vec<ReliablePacket> {
        let ids: Vec<ConfirmationId> = self
            .packets
            .values()
            .filter(|packet| packet.peer() == peer)
            .map(|packet| packet.id())
            .collect();

        let mut abandoned: Vec<ReliablePacket> = ids
            .into_iter()
            .filter_map(|id| self.packets.remove(&id))
            .collect();
        for packet in &mut abandoned {
            packet.abandon();
        }
        abandoned.sort_by_key(|packet| packet.id());
        abandoned
    }

    pub fn get(&self, id: ConfirmationId) -> Option<&ReliablePacket> {
        self.packets.get(&id)
    }

    pub fn outstanding_for(&self, peer: PeerId) -> usize {
        self.packets.values().filter(|p| p.peer() == peer).count()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.packets.values().map(|p| p.next_retry_time()).min()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.schedule.clear();
    }
}
