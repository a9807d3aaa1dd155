//! Byte ring holding length-prefixed entries in contiguous slots.
//!
//! An entry never straddles the end of the buffer: when the tail segment is
//! too short the writer wraps to offset zero and the unused tail bytes are
//! skipped by the reader (`watermark` marks where valid data ends).

const LEN_PREFIX: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Reservation {
    start: usize,
    max_len: usize,
    wraps: bool,
}

#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
    watermark: usize,
    wrapped: bool,
    reservation: Option<Reservation>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            watermark: capacity,
            wrapped: false,
            reservation: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.wrapped && self.head == self.tail
    }

    /// Bytes currently held, including the skipped tail gap while wrapped.
    pub fn used(&self) -> usize {
        if self.wrapped {
            self.watermark - self.head + self.tail
        } else {
            self.tail - self.head
        }
    }

    /// Reserves a contiguous slot for an entry of up to `len` bytes. The
    /// slot is not visible to readers until [`commit`](Self::commit).
    pub fn reserve(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > u16::MAX as usize {
            return None;
        }
        let needed = LEN_PREFIX + len;

        let (start, wraps) = if self.wrapped {
            if self.tail + needed > self.head {
                return None;
            }
            (self.tail, false)
        } else if self.tail + needed <= self.buf.len() {
            (self.tail, false)
        } else if needed <= self.head {
            (0, true)
        } else {
            return None;
        };

        self.reservation = Some(Reservation {
            start,
            max_len: len,
            wraps,
        });
        Some(&mut self.buf[start + LEN_PREFIX..start + needed])
    }

    /// Publishes the first `len` bytes of the reserved slot.
    pub fn commit(&mut self, len: usize) -> bool {
        let Some(reservation) = self.reservation.take() else {
            return false;
        };
        if len > reservation.max_len {
            return false;
        }

        if reservation.wraps {
            if self.head == self.tail {
                // Drained while the slot was reserved: nothing left above it.
                self.head = 0;
            } else {
                self.watermark = self.tail;
                self.wrapped = true;
            }
        }
        let start = reservation.start;
        self.buf[start..start + LEN_PREFIX].copy_from_slice(&(len as u16).to_be_bytes());
        self.tail = start + LEN_PREFIX + len;
        true
    }

    pub fn push(&mut self, data: &[u8]) -> bool {
        match self.reserve(data.len()) {
            Some(slot) => slot.copy_from_slice(data),
            None => return false,
        }
        self.commit(data.len())
    }

    fn entry_len(&self, at: usize) -> usize {
        u16::from_be_bytes([self.buf[at], self.buf[at + 1]]) as usize
    }

    pub fn peek(&self) -> Option<&[u8]> {
        if self.is_empty() {
            return None;
        }
        let start = self.head + LEN_PREFIX;
        Some(&self.buf[start..start + self.entry_len(self.head)])
    }

    /// Discards the oldest entry.
    pub fn consume(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.head += LEN_PREFIX + self.entry_len(self.head);

        if self.wrapped && self.head >= self.watermark {
            self.head = 0;
            self.wrapped = false;
            self.watermark = self.buf.len();
        }
        if self.is_empty() && self.reservation.is_none() {
            self.head = 0;
            self.tail = 0;
        }
        true
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.watermark = self.buf.len();
        self.wrapped = false;
        self.reservation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut ring = RingBuffer::new(64);

        assert!(ring.push(b"one"));
        assert!(ring.push(b"two"));
        assert!(ring.push(b"three"));

        assert_eq!(ring.peek(), Some(&b"one"[..]));
        assert!(ring.consume());
        assert_eq!(ring.peek(), Some(&b"two"[..]));
        assert!(ring.consume());
        assert_eq!(ring.peek(), Some(&b"three"[..]));
        assert!(ring.consume());
        assert!(ring.is_empty());
        assert!(!ring.consume());
    }

    #[test]
    fn test_full_buffer_rejects_without_overwriting() {
        let mut ring = RingBuffer::new(16);

        assert!(ring.push(&[1; 6]));
        assert!(ring.push(&[2; 6]));
        assert!(!ring.push(&[3; 6]));

        assert_eq!(ring.peek(), Some(&[1u8; 6][..]));
    }

    #[test]
    fn test_wraps_around_the_end() {
        let mut ring = RingBuffer::new(20);

        assert!(ring.push(&[1; 6]));
        assert!(ring.push(&[2; 6]));
        assert!(ring.consume());

        // Only the 8 bytes in front of the head are free, so this entry wraps.
        assert!(ring.push(&[3; 6]));
        assert!(!ring.push(&[4; 1]));

        assert_eq!(ring.peek(), Some(&[2u8; 6][..]));
        assert!(ring.consume());
        assert_eq!(ring.peek(), Some(&[3u8; 6][..]));
        assert!(ring.consume());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_commit_shorter_than_reserved() {
        let mut ring = RingBuffer::new(32);

        let slot = ring.reserve(10).unwrap();
        slot[..4].copy_from_slice(b"abcd");
        assert!(ring.commit(4));

        assert_eq!(ring.peek(), Some(&b"abcd"[..]));
        assert_eq!(ring.used(), 6);
    }

    #[test]
    fn test_commit_without_reservation_fails() {
        let mut ring = RingBuffer::new(32);

        assert!(!ring.commit(1));
        ring.reserve(4).unwrap();
        assert!(!ring.commit(5));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_empty_entries() {
        let mut ring = RingBuffer::new(8);

        assert!(ring.push(&[]));
        assert!(!ring.is_empty());
        assert_eq!(ring.peek(), Some(&[][..]));
        assert!(ring.consume());
        assert!(ring.is_empty());
    }
}
