//! Buffer Pools
//!
//! Size-classed pools for the scratch the streaming decoder churns through:
//! one line buffer and one symbol-reference buffer per entry would otherwise
//! be allocated and dropped millions of times per query.
//!
//! A pool keeps free lists per power-of-two size class. `get(n)` returns a
//! vector whose capacity is at least `n` (fresh if the class is empty);
//! `put` files the vector back under the largest class it still covers.
//! Buffers never shrink, so a vector cycles between a class and its callers
//! without reallocation.
//!
//! Pools must never alias: a buffer is owned by exactly one caller between
//! `get` and `put`. Iterators return their buffers in `Drop`, which makes
//! drop the single release point on every exit path, error or not.

use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::symbolizer::Symbol;

/// Free buffers retained per size class.
const MAX_PER_CLASS: usize = 64;

/// A size-classed pool of `Vec<T>` scratch buffers.
pub struct SlicePool<T> {
    min: usize,
    classes: Vec<Mutex<Vec<Vec<T>>>>,
}

impl<T> SlicePool<T> {
    /// Pool with power-of-two classes covering `min..=max` capacities.
    pub fn new(min: usize, max: usize) -> Self {
        assert!(min.is_power_of_two() && max >= min);
        let mut classes = Vec::new();
        let mut size = min;
        while size <= max {
            classes.push(Mutex::new(Vec::new()));
            size *= 2;
        }
        Self { min, classes }
    }

    fn class_size(&self, idx: usize) -> usize {
        self.min << idx
    }

    /// Smallest class whose buffers hold `size` elements.
    fn class_for(&self, size: usize) -> Option<usize> {
        let mut idx = 0;
        while idx < self.classes.len() {
            if self.class_size(idx) >= size {
                return Some(idx);
            }
            idx += 1;
        }
        None
    }

    /// An empty buffer with capacity at least `size`.
    pub fn get(&self, size: usize) -> Vec<T> {
        match self.class_for(size) {
            Some(idx) => {
                if let Some(buf) = self.classes[idx].lock().pop() {
                    return buf;
                }
                Vec::with_capacity(self.class_size(idx))
            }
            // Oversized requests bypass the pool entirely.
            None => Vec::with_capacity(size),
        }
    }

    /// Return a buffer to the pool; contents are discarded.
    pub fn put(&self, mut buf: Vec<T>) {
        if buf.capacity() < self.min {
            return;
        }
        buf.clear();

        // File under the largest class the capacity still covers, so a
        // buffer that grew keeps serving larger requests.
        let mut idx = 0;
        while idx + 1 < self.classes.len() && self.class_size(idx + 1) <= buf.capacity() {
            idx += 1;
        }
        let mut class = self.classes[idx].lock();
        if class.len() < MAX_PER_CLASS {
            class.push(buf);
        }
    }
}

static LINE_POOL: OnceLock<SlicePool<u8>> = OnceLock::new();
static SYMBOLS_POOL: OnceLock<SlicePool<Symbol>> = OnceLock::new();

/// Process-wide pool for decoded line buffers (1 KiB - 32 MiB classes).
pub fn lines() -> &'static SlicePool<u8> {
    LINE_POOL.get_or_init(|| SlicePool::new(1 << 10, 1 << 25))
}

/// Process-wide pool for decoded symbol-reference buffers.
pub fn symbols() -> &'static SlicePool<Symbol> {
    SYMBOLS_POOL.get_or_init(|| SlicePool::new(16, 1 << 12))
}
