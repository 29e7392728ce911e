//! Fixed-capacity history of recent entries.

use std::collections::VecDeque;

/// Number of recent count details kept for display.
pub const DETAIL_CAPACITY: usize = 10;

/// Keeps the most recent `capacity` entries, evicting the oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A buffer holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `entry`, returning the evicted one if the buffer was full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }
}

impl<T> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(DETAIL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_ten_in_arrival_order() {
        let mut ring = RingBuffer::default();
        for n in 1..=12 {
            ring.push(n);
        }
        assert_eq!(ring.len(), DETAIL_CAPACITY);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), (3..=12).collect::<Vec<_>>());
        assert_eq!(ring.latest(), Some(&12));
    }

    #[test]
    fn push_reports_eviction() {
        let mut ring = RingBuffer::new(2);
        assert_eq!(ring.push('a'), None);
        assert_eq!(ring.push('b'), None);
        assert_eq!(ring.push('c'), Some('a'));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut ring = RingBuffer::new(0);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.latest(), Some(&2));
    }

    #[test]
    fn clear_empties() {
        let mut ring = RingBuffer::default();
        ring.push("x");
        ring.clear();
        assert!(ring.is_empty());
    }
}
