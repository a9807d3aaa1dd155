use super::ring::RingBuffer;

/// Bounded FIFO of serialized packets with age-based shedding.
///
/// Under a full stall with `M` arrivals per cycle, shedding
/// `floor(depth * drop_fraction)` entries each cycle holds the depth near
/// `M / drop_fraction`, which bounds how old a queued packet can get.
#[derive(Debug)]
pub struct PacketQueue {
    ring: RingBuffer,
    depth: usize,
    drop_fraction: f64,
}

impl PacketQueue {
    pub fn new(capacity: usize, drop_fraction: f32) -> Self {
        let clamped = (drop_fraction as f64).clamp(f64::EPSILON, 1.0);
        if clamped != drop_fraction as f64 {
            log::warn!(
                "drop fraction {} outside (0, 1], using {}",
                drop_fraction,
                clamped
            );
        }
        Self {
            ring: RingBuffer::new(capacity),
            depth: 0,
            drop_fraction: clamped,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn used_bytes(&self) -> usize {
        self.ring.used()
    }

    pub fn drop_fraction(&self) -> f64 {
        self.drop_fraction
    }

    /// Reserves room for a packet of up to `size` bytes. `None` means the
    /// queue is full; the caller decides whether to drop or retry later.
    pub fn reserve_write(&mut self, size: usize) -> Option<&mut [u8]> {
        self.ring.reserve(size)
    }

    pub fn commit_write(&mut self, size: usize) -> bool {
        if !self.ring.commit(size) {
            return false;
        }
        self.depth += 1;
        true
    }

    pub fn push(&mut self, packet: &[u8]) -> bool {
        if !self.ring.push(packet) {
            return false;
        }
        self.depth += 1;
        true
    }

    /// The oldest packet, left in place until [`release_read`](Self::release_read).
    pub fn front(&self) -> Option<&[u8]> {
        self.ring.peek()
    }

    pub fn release_read(&mut self) -> bool {
        if !self.ring.consume() {
            return false;
        }
        self.depth -= 1;
        true
    }

    pub fn estimate_excess(&self) -> usize {
        (self.depth as f64 * self.drop_fraction).floor() as usize
    }

    /// Sheds the oldest `estimate_excess()` packets and returns how many
    /// were removed.
    pub fn drop_oldest(&mut self) -> usize {
        let excess = self.estimate_excess();
        let mut dropped = 0;
        while dropped < excess && self.release_read() {
            dropped += 1;
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        self.depth = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_counts_packets_not_bytes() {
        let mut queue = PacketQueue::new(256, 0.5);

        assert!(queue.push(&[0; 40]));
        assert!(queue.push(&[1; 3]));
        assert_eq!(queue.depth(), 2);

        assert!(queue.release_read());
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.front(), Some(&[1u8; 3][..]));
    }

    #[test]
    fn test_reserve_and_commit() {
        let mut queue = PacketQueue::new(64, 0.5);

        let slot = queue.reserve_write(16).unwrap();
        slot[..2].copy_from_slice(&[9, 9]);
        assert_eq!(queue.depth(), 0);

        assert!(queue.commit_write(2));
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.front(), Some(&[9u8, 9][..]));
    }

    #[test]
    fn test_drop_oldest_is_fifo() {
        let mut queue = PacketQueue::new(256, 0.5);
        for i in 0..5u8 {
            assert!(queue.push(&[i]));
        }

        assert_eq!(queue.estimate_excess(), 2);
        assert_eq!(queue.drop_oldest(), 2);
        assert_eq!(queue.depth(), 3);
        assert_eq!(queue.front(), Some(&[2u8][..]));
    }

    #[test]
    fn test_exhausted_queue_refuses_writes() {
        let mut queue = PacketQueue::new(12, 1.0);

        assert!(queue.push(&[7; 4]));
        assert!(queue.push(&[8; 4]));
        assert!(!queue.push(&[9; 4]));
        assert!(queue.reserve_write(4).is_none());
        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.front(), Some(&[7u8; 4][..]));
    }

    #[test]
    fn test_drop_fraction_saturation() {
        const PER_CYCLE: usize = 10;
        let fraction = 0.25;
        let mut queue = PacketQueue::new(64 * 1024, fraction);

        let mut peak = 0;
        for cycle in 0..200 {
            for _ in 0..PER_CYCLE {
                assert!(queue.push(&[0xAB; 8]), "queue exhausted at cycle {}", cycle);
            }
            peak = queue.depth();
            queue.drop_oldest();
        }

        let expected = (PER_CYCLE as f32 / fraction) as usize;
        assert!(
            peak >= expected && peak < expected + (1.0 / fraction) as usize,
            "depth {} did not settle near {}",
            peak,
            expected
        );

        for _ in 0..50 {
            for _ in 0..PER_CYCLE {
                queue.push(&[0xAB; 8]);
            }
            assert_eq!(queue.depth(), peak);
            queue.drop_oldest();
        }
    }

    #[test]
    fn test_out_of_range_fraction_is_clamped() {
        assert_eq!(PacketQueue::new(16, 3.0).drop_fraction(), 1.0);
        assert!(PacketQueue::new(16, 0.0).drop_fraction() > 0.0);
    }
}
