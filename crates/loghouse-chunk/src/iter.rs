//! Iterator Composition
//!
//! A chunk query touches several independently-sorted sources: one streaming
//! decoder per selected sealed block plus a snapshot of the head. This
//! module assembles them into a single stream:
//!
//! - [`concat`]: plain concatenation when the sources are known to be
//!   globally ordered (non-overlapping blocks)
//! - [`SortMerge`]: a binary-heap merge keyed by `(timestamp, stream_hash)`
//!   when blocks overlap
//! - [`TimeRanged`]: clamps a sorted stream to `[from, to)` and halts at the
//!   first entry past `to`
//! - [`Reversed`]: buffers one naturally-ascending source and replays it
//!   backwards, used per block for descending queries
//!
//! Streams yield `Result` items; the first error ends the stream, matching
//! the "stop and expose the error" contract of the decoders underneath.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;

use bytes::Bytes;
use loghouse_core::{Error, Labels, Result};

/// Direction of chunk iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Options accepted by entry iterators.
#[derive(Debug, Default, Clone, Copy)]
pub struct IterOptions {
    /// Carry each entry's structured labels on the output.
    ///
    /// Usually the pipeline has already folded them into its derived labels;
    /// rebound turns this on so entries can be re-appended losslessly.
    pub keep_structured_labels: bool,
}

/// One pipeline-processed entry emitted by a chunk iterator.
#[derive(Debug, Clone, PartialEq)]
pub struct IterEntry {
    /// Timestamp in nanoseconds since epoch
    pub t: i64,
    /// The (possibly rewritten) line
    pub line: Bytes,
    /// Labels derived by the pipeline
    pub labels: Labels,
    /// The entry's structured labels, when preservation is enabled
    pub structured: Labels,
    /// Hash of the stream the producing pipeline was built for
    pub stream_hash: u64,
}

/// One extracted sample emitted by a chunk sample iterator.
#[derive(Debug, Clone, PartialEq)]
pub struct IterSample {
    /// Timestamp in nanoseconds since epoch
    pub t: i64,
    /// The extracted value
    pub value: f64,
    /// xxhash64 of the original line, the per-sample identity
    pub hash: u64,
    /// Labels derived by the extractor
    pub labels: Labels,
    /// Hash of the stream the producing extractor was built for
    pub stream_hash: u64,
}

/// Sort key shared by entries and samples so the combinators are generic.
pub trait Sortable {
    fn ts(&self) -> i64;
    fn stream_hash(&self) -> u64;
}

impl Sortable for IterEntry {
    fn ts(&self) -> i64 {
        self.t
    }
    fn stream_hash(&self) -> u64 {
        self.stream_hash
    }
}

impl Sortable for IterSample {
    fn ts(&self) -> i64 {
        self.t
    }
    fn stream_hash(&self) -> u64 {
        self.stream_hash
    }
}

pub type Stream<T> = Box<dyn Iterator<Item = Result<T>>>;
pub type EntryStream = Stream<IterEntry>;
pub type SampleStream = Stream<IterSample>;

/// A stream yielding nothing.
pub fn empty<T: 'static>() -> Stream<T> {
    Box::new(std::iter::empty())
}

/// Concatenate sources whose ranges are known not to overlap.
pub fn concat<T: 'static>(sources: Vec<Stream<T>>) -> Stream<T> {
    Box::new(sources.into_iter().flatten())
}

struct HeapItem<T> {
    t: i64,
    hash: u64,
    seq: u64,
    forward: bool,
    item: T,
    source: Stream<T>,
}

impl<T> HeapItem<T> {
    fn key(&self) -> (i64, u64, u64) {
        (self.t, self.hash, self.seq)
    }
}

impl<T> PartialEq for HeapItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for HeapItem<T> {}

impl<T> PartialOrd for HeapItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapItem<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        let ord = self.key().cmp(&other.key());
        // BinaryHeap pops its maximum; invert for ascending output.
        if self.forward {
            ord.reverse()
        } else {
            ord
        }
    }
}

/// Heap-based sort-merge over independently sorted sources.
///
/// Entries with equal `(timestamp, stream_hash)` keep the order in which
/// their sources were supplied (forward) or its inverse (backward).
pub struct SortMerge<T: Sortable> {
    heap: BinaryHeap<HeapItem<T>>,
    pending: Vec<Stream<T>>,
    direction: Direction,
    seq: u64,
    pending_err: Option<Error>,
    done: bool,
}

impl<T: Sortable> SortMerge<T> {
    pub fn new(sources: Vec<Stream<T>>, direction: Direction) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            pending: sources,
            direction,
            seq: 0,
            pending_err: None,
            done: false,
        }
    }

    pub fn boxed(sources: Vec<Stream<T>>, direction: Direction) -> Stream<T>
    where
        T: 'static,
    {
        Box::new(Self::new(sources, direction))
    }

    fn push(&mut self, item: T, source: Stream<T>) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(HeapItem {
            t: item.ts(),
            hash: item.stream_hash(),
            seq,
            forward: self.direction == Direction::Forward,
            item,
            source,
        });
    }
}

impl<T: Sortable> Iterator for SortMerge<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if self.done {
            return None;
        }
        if let Some(e) = self.pending_err.take() {
            self.done = true;
            return Some(Err(e));
        }

        // Prime the heap with the first item of every source.
        let pending = std::mem::take(&mut self.pending);
        for mut src in pending {
            match src.next() {
                Some(Ok(item)) => self.push(item, src),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {}
            }
        }

        let HeapItem {
            item, mut source, ..
        } = self.heap.pop()?;

        match source.next() {
            Some(Ok(next_item)) => self.push(next_item, source),
            // Emit the popped item first; surface the error on the next call.
            Some(Err(e)) => self.pending_err = Some(e),
            None => {}
        }

        Some(Ok(item))
    }
}

/// Clamp an ascending stream to `[from, to)`.
///
/// Halts permanently at the first item with `ts >= to`.
pub struct TimeRanged<T: Sortable> {
    inner: Stream<T>,
    from: i64,
    to: i64,
    done: bool,
}

impl<T: Sortable> TimeRanged<T> {
    pub fn new(inner: Stream<T>, from: i64, to: i64) -> Self {
        Self {
            inner,
            from,
            to,
            done: false,
        }
    }

    pub fn boxed(inner: Stream<T>, from: i64, to: i64) -> Stream<T>
    where
        T: 'static,
    {
        Box::new(Self::new(inner, from, to))
    }
}

impl<T: Sortable> Iterator for TimeRanged<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        loop {
            if self.done {
                return None;
            }
            match self.inner.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(item)) => {
                    if item.ts() < self.from {
                        continue;
                    }
                    if item.ts() >= self.to {
                        self.done = true;
                        return None;
                    }
                    return Some(Ok(item));
                }
            }
        }
    }
}

/// Buffer an ascending source and replay it in descending order.
///
/// If the source fails mid-stream, everything buffered so far is still
/// replayed and the error is surfaced last.
pub struct Reversed<T> {
    inner: Option<Stream<T>>,
    buffered: Vec<T>,
    err: Option<Error>,
}

impl<T> Reversed<T> {
    pub fn new(inner: Stream<T>) -> Self {
        Self {
            inner: Some(inner),
            buffered: Vec::new(),
            err: None,
        }
    }

    pub fn boxed(inner: Stream<T>) -> Stream<T>
    where
        T: 'static,
    {
        Box::new(Self::new(inner))
    }
}

impl<T> Iterator for Reversed<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if let Some(inner) = self.inner.take() {
            for item in inner {
                match item {
                    Ok(v) => self.buffered.push(v),
                    Err(e) => {
                        self.err = Some(e);
                        break;
                    }
                }
            }
        }
        if let Some(item) = self.buffered.pop() {
            return Some(Ok(item));
        }
        self.err.take().map(Err)
    }
}
