//! Query Decode Statistics
//!
//! Iterators account for the bytes and lines they touch on a caller-supplied
//! context. The counters are atomic so several block iterators running for
//! the same query can share one context; iterators only ever add - reading
//! and resetting is the caller's business.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared handle to one query's decode counters.
pub type StatsContext = Arc<ChunkStats>;

/// Counters accumulated while decoding chunk data.
#[derive(Debug, Default)]
pub struct ChunkStats {
    compressed_bytes: AtomicU64,
    decompressed_bytes: AtomicU64,
    decompressed_lines: AtomicU64,
    decompressed_structured_bytes: AtomicU64,
    head_chunk_lines: AtomicU64,
    head_chunk_bytes: AtomicU64,
    post_filter_lines: AtomicU64,
}

impl ChunkStats {
    pub fn new_context() -> StatsContext {
        Arc::new(ChunkStats::default())
    }

    pub fn add_compressed_bytes(&self, n: u64) {
        self.compressed_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_decompressed_bytes(&self, n: u64) {
        self.decompressed_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_decompressed_lines(&self, n: u64) {
        self.decompressed_lines.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_decompressed_structured_bytes(&self, n: u64) {
        self.decompressed_structured_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_head_chunk_lines(&self, n: u64) {
        self.head_chunk_lines.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_head_chunk_bytes(&self, n: u64) {
        self.head_chunk_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_post_filter_lines(&self, n: u64) {
        self.post_filter_lines.fetch_add(n, Ordering::Relaxed);
    }

    pub fn compressed_bytes(&self) -> u64 {
        self.compressed_bytes.load(Ordering::Relaxed)
    }

    pub fn decompressed_bytes(&self) -> u64 {
        self.decompressed_bytes.load(Ordering::Relaxed)
    }

    pub fn decompressed_lines(&self) -> u64 {
        self.decompressed_lines.load(Ordering::Relaxed)
    }

    pub fn decompressed_structured_bytes(&self) -> u64 {
        self.decompressed_structured_bytes.load(Ordering::Relaxed)
    }

    pub fn head_chunk_lines(&self) -> u64 {
        self.head_chunk_lines.load(Ordering::Relaxed)
    }

    pub fn head_chunk_bytes(&self) -> u64 {
        self.head_chunk_bytes.load(Ordering::Relaxed)
    }

    pub fn post_filter_lines(&self) -> u64 {
        self.post_filter_lines.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = ChunkStats::new_context();
        stats.add_compressed_bytes(10);
        stats.add_compressed_bytes(5);
        stats.add_decompressed_lines(2);
        assert_eq!(stats.compressed_bytes(), 15);
        assert_eq!(stats.decompressed_lines(), 2);
        assert_eq!(stats.decompressed_bytes(), 0);
    }

    #[test]
    fn test_shared_across_clones() {
        let stats = ChunkStats::new_context();
        let other = Arc::clone(&stats);
        stats.add_post_filter_lines(1);
        other.add_post_filter_lines(2);
        assert_eq!(stats.post_filter_lines(), 3);
    }
}
