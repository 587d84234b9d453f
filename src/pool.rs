//! Rentable byte buffers for disk-writer jobs.

use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Buffers retained per size class; excess returns are simply dropped so
/// `give_back` can never fail.
const MAX_PER_CLASS: usize = 32;

/// A thread-safe pool of byte buffers, bucketed by power-of-two capacity.
///
/// `rent(n)` returns a buffer of length >= `n`; ownership transfers to the
/// caller (typically into a write job) and comes back via `give_back`. The
/// only invariant the pool relies on is that each rented buffer is returned
/// at most once, which buffer ownership enforces by construction.
pub struct BufferPool {
    classes: Mutex<BTreeMap<usize, Vec<Vec<u8>>>>,
}

impl BufferPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self {
            classes: Mutex::new(BTreeMap::new()),
        }
    }

    fn class_for(len: usize) -> usize {
        len.max(64).next_power_of_two()
    }

    /// Rents a buffer with `len() >= requested`.
    ///
    /// Reuses a pooled buffer of the matching size class when one is
    /// available, otherwise allocates. Contents are unspecified; callers
    /// overwrite the prefix they use.
    pub fn rent(&self, requested: usize) -> Vec<u8> {
        let class = Self::class_for(requested);
        let reused = {
            let mut classes = self.classes.lock();
            classes.get_mut(&class).and_then(Vec::pop)
        };
        reused.unwrap_or_else(|| vec![0u8; class])
    }

    /// Returns a buffer to the pool. Never fails; buffers beyond the
    /// per-class retention limit are dropped.
    pub fn give_back(&self, buf: Vec<u8>) {
        if buf.is_empty() {
            return;
        }
        let class = Self::class_for(buf.len());
        // Only buffers that still span their class are reusable as-is.
        if buf.len() != class {
            return;
        }
        let mut classes = self.classes.lock();
        let slot = classes.entry(class).or_default();
        if slot.len() < MAX_PER_CLASS {
            slot.push(buf);
        }
    }

    /// Total buffers currently held, across all classes.
    pub fn pooled_count(&self) -> usize {
        self.classes.lock().values().map(Vec::len).sum()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rent_meets_requested_length() {
        let pool = BufferPool::new();
        let buf = pool.rent(1000);
        assert!(buf.len() >= 1000);
    }

    #[test]
    fn test_round_trip_reuses_buffer() {
        let pool = BufferPool::new();
        let buf = pool.rent(4096);
        let ptr = buf.as_ptr();
        pool.give_back(buf);
        assert_eq!(pool.pooled_count(), 1);

        let again = pool.rent(4096);
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(pool.pooled_count(), 0);
    }

    #[test]
    fn test_same_class_shared_by_nearby_sizes() {
        let pool = BufferPool::new();
        let buf = pool.rent(3000);
        assert_eq!(buf.len(), 4096);
        pool.give_back(buf);

        // 2049..=4096 land in the same class.
        let again = pool.rent(2100);
        assert_eq!(again.len(), 4096);
        assert_eq!(pool.pooled_count(), 0);
    }

    #[test]
    fn test_retention_is_bounded() {
        let pool = BufferPool::new();
        for _ in 0..(MAX_PER_CLASS + 10) {
            pool.give_back(vec![0u8; 1024]);
        }
        assert_eq!(pool.pooled_count(), MAX_PER_CLASS);
    }

    #[test]
    fn test_give_back_from_many_threads() {
        use std::sync::Arc;

        let pool = Arc::new(BufferPool::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let buf = pool.rent(512);
                    pool.give_back(buf);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.pooled_count() <= MAX_PER_CLASS);
    }
}
