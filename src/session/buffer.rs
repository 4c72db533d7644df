//! # Telemetry Ring Buffer
//!
//! Bounded, append-only sequence of records in reception order. When full,
//! the oldest record is evicted. Records are never reordered: out-of-order
//! delivery is only accounted for by the sequence tracker.

use std::collections::VecDeque;

/// Default number of records kept per session
pub const DEFAULT_CAPACITY: usize = 500;

/// Default chart window size
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Bounded FIFO of telemetry samples
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append to the tail, evicting the oldest item when over capacity
    ///
    /// # Returns
    ///
    /// * `Option<T>` - The evicted item, if any
    pub fn append(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Inclusive window `[max(0, end_index - size + 1), end_index]`
    ///
    /// `end_index` is clamped to the last index. Returns an owned copy so
    /// callers never hold a reference into the buffer's storage.
    ///
    /// # Examples
    ///
    /// ```
    /// use cansat_ground::session::buffer::RingBuffer;
    ///
    /// let mut buffer = RingBuffer::new(10);
    /// for i in 0..6 {
    ///     buffer.append(i);
    /// }
    /// assert_eq!(buffer.window(4, 3), vec![2, 3, 4]);
    /// assert_eq!(buffer.window(1, 100), vec![0, 1]);
    /// ```
    pub fn window(&self, end_index: usize, size: usize) -> Vec<T> {
        if self.items.is_empty() || size == 0 {
            return Vec::new();
        }
        let end = end_index.min(self.items.len() - 1);
        let start = (end + 1).saturating_sub(size);
        self.items.range(start..=end).cloned().collect()
    }

    /// The last `size` items
    pub fn tail(&self, size: usize) -> Vec<T> {
        match self.items.len() {
            0 => Vec::new(),
            len => self.window(len - 1, size),
        }
    }

    /// Most recent item
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Oldest surviving item
    pub fn oldest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Owned copy of every buffered item, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
