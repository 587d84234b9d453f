//! Mic ring buffer: canonical-format float FIFO shared between the mic
//! handler (producer) and the loopback handler (consumer).
//!
//! The ring itself is not synchronized; the session controller wraps it in a
//! `parking_lot::Mutex` held only across single push/pop/clear calls, never
//! across I/O.

/// Fixed-capacity FIFO of interleaved f32 samples with overwrite-oldest
/// policy.
///
/// Capacity is always a power of two so index wrapping is a mask. Boundary
/// conditions are handled by policy, not by errors:
///
/// - a push with insufficient room advances the read cursor over the oldest
///   samples (overrun)
/// - a pop with insufficient data returns fewer samples than requested
///   (underrun); the caller zero-fills the deficit
pub struct MicRing {
    buf: Vec<f32>,
    read: usize,
    write: usize,
    len: usize,
}

impl MicRing {
    /// Creates a ring with capacity of at least `min_capacity` samples,
    /// rounded up to the next power of two.
    pub fn with_capacity(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(2).next_power_of_two();
        Self {
            buf: vec![0.0; capacity],
            read: 0,
            write: 0,
            len: 0,
        }
    }

    /// Backing capacity in samples.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of live samples currently buffered.
    pub fn backlog_samples(&self) -> usize {
        self.len
    }

    fn mask(&self) -> usize {
        self.buf.len() - 1
    }

    /// Writes `samples` into the ring, overwriting the oldest samples if
    /// there is insufficient room.
    pub fn push(&mut self, samples: &[f32]) {
        let capacity = self.capacity();

        // A block larger than the whole ring reduces to its newest tail.
        if samples.len() >= capacity {
            let tail = &samples[samples.len() - capacity..];
            self.buf.copy_from_slice(tail);
            self.read = 0;
            self.write = 0;
            self.len = capacity;
            return;
        }

        let room = capacity - self.len;
        if samples.len() > room {
            let discard = samples.len() - room;
            self.read = (self.read + discard) & self.mask();
            self.len -= discard;
        }

        let mask = self.mask();
        let first = (capacity - self.write).min(samples.len());
        self.buf[self.write..self.write + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&samples[first..]);
        }
        self.write = (self.write + samples.len()) & mask;
        self.len += samples.len();
    }

    /// Copies up to `dst.len()` samples out of the ring, returning the
    /// number actually delivered (less than requested on underrun).
    pub fn pop(&mut self, dst: &mut [f32]) -> usize {
        let take = dst.len().min(self.len);
        if take == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let first = (capacity - self.read).min(take);
        dst[..first].copy_from_slice(&self.buf[self.read..self.read + first]);
        let rest = take - first;
        if rest > 0 {
            dst[first..take].copy_from_slice(&self.buf[..rest]);
        }
        self.read = (self.read + take) & self.mask();
        self.len -= take;
        take
    }

    /// Discards all buffered samples, aligning read to write.
    pub fn clear(&mut self) {
        self.read = self.write;
        self.len = 0;
    }

    /// Grows the backing storage to the next power of two >= `min_capacity`,
    /// preserving buffered contents. No-op if already large enough.
    pub fn grow(&mut self, min_capacity: usize) {
        if min_capacity <= self.capacity() {
            return;
        }
        let new_capacity = min_capacity.next_power_of_two();
        let mut new_buf = vec![0.0; new_capacity];

        let capacity = self.capacity();
        let first = (capacity - self.read).min(self.len);
        new_buf[..first].copy_from_slice(&self.buf[self.read..self.read + first]);
        let rest = self.len - first;
        if rest > 0 {
            new_buf[first..self.len].copy_from_slice(&self.buf[..rest]);
        }

        self.buf = new_buf;
        self.read = 0;
        self.write = self.len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let ring = MicRing::with_capacity(100);
        assert_eq!(ring.capacity(), 128);
        let ring = MicRing::with_capacity(384_000);
        assert_eq!(ring.capacity(), 524_288);
    }

    #[test]
    fn test_push_pop_fifo_order() {
        let mut ring = MicRing::with_capacity(8);
        ring.push(&[1.0, 2.0, 3.0]);
        assert_eq!(ring.backlog_samples(), 3);

        let mut dst = [0.0f32; 3];
        assert_eq!(ring.pop(&mut dst), 3);
        assert_eq!(dst, [1.0, 2.0, 3.0]);
        assert_eq!(ring.backlog_samples(), 0);
    }

    #[test]
    fn test_pop_underrun_returns_short_count() {
        let mut ring = MicRing::with_capacity(8);
        ring.push(&[1.0, 2.0]);

        let mut dst = [9.0f32; 4];
        assert_eq!(ring.pop(&mut dst), 2);
        assert_eq!(&dst[..2], &[1.0, 2.0]);
        // Remainder untouched; the caller zero-fills the deficit.
        assert_eq!(&dst[2..], &[9.0, 9.0]);
    }

    #[test]
    fn test_full_ring_overwrites_oldest() {
        let mut ring = MicRing::with_capacity(4);
        ring.push(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ring.backlog_samples(), 4);

        // One more push at capacity advances the read cursor.
        ring.push(&[5.0]);
        assert_eq!(ring.backlog_samples(), 4);

        let mut dst = [0.0f32; 4];
        assert_eq!(ring.pop(&mut dst), 4);
        assert_eq!(dst, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_push_larger_than_capacity_keeps_newest() {
        let mut ring = MicRing::with_capacity(4);
        ring.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(ring.backlog_samples(), 4);

        let mut dst = [0.0f32; 4];
        ring.pop(&mut dst);
        assert_eq!(dst, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_wrap_around_copy_segments() {
        let mut ring = MicRing::with_capacity(4);
        ring.push(&[1.0, 2.0, 3.0]);
        let mut dst = [0.0f32; 2];
        ring.pop(&mut dst);

        // write is at 3, read at 2; this push wraps.
        ring.push(&[4.0, 5.0, 6.0]);
        let mut dst = [0.0f32; 4];
        assert_eq!(ring.pop(&mut dst), 4);
        assert_eq!(dst, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_clear_aligns_read_to_write() {
        let mut ring = MicRing::with_capacity(8);
        ring.push(&[1.0, 2.0, 3.0]);
        ring.clear();
        assert_eq!(ring.backlog_samples(), 0);

        let mut dst = [0.0f32; 3];
        assert_eq!(ring.pop(&mut dst), 0);

        // Ring is still usable after clear.
        ring.push(&[7.0, 8.0]);
        assert_eq!(ring.pop(&mut dst), 2);
        assert_eq!(&dst[..2], &[7.0, 8.0]);
    }

    #[test]
    fn test_grow_preserves_contents_in_order() {
        let mut ring = MicRing::with_capacity(4);
        ring.push(&[1.0, 2.0, 3.0, 4.0]);
        let mut dst = [0.0f32; 2];
        ring.pop(&mut dst);
        ring.push(&[5.0, 6.0]); // wrapped layout

        ring.grow(16);
        assert_eq!(ring.capacity(), 16);
        assert_eq!(ring.backlog_samples(), 4);

        let mut dst = [0.0f32; 4];
        assert_eq!(ring.pop(&mut dst), 4);
        assert_eq!(dst, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_grow_noop_when_large_enough() {
        let mut ring = MicRing::with_capacity(16);
        ring.push(&[1.0]);
        ring.grow(8);
        assert_eq!(ring.capacity(), 16);
        assert_eq!(ring.backlog_samples(), 1);
    }
}
