//! Loghouse Chunk Codec
//!
//! This crate implements the chunk - the immutable, self-describing,
//! compressed unit by which a log store groups a bounded, time-ordered run of
//! entries for a single stream.
//!
//! ## What is a Chunk?
//!
//! A chunk holds:
//!
//! 1. **A head block**: the mutable region accepting newly appended entries
//! 2. **Sealed blocks**: previously accumulated entries, compressed and
//!    CRC-framed, produced by *cutting* the head
//! 3. **A symbol table**: per-chunk interning of structured labels so
//!    repeated `(name, value)` pairs are stored once
//! 4. **Binary framing**: the wire form written to object storage and
//!    reopened for iteration, time-range filtering and rebuilds
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────┐ append   ┌────────────┐  cut   ┌───────────────┐
//! │  caller  ├─────────►│ head block ├───────►│ sealed blocks │
//! └──────────┘          └────────────┘        └───────┬───────┘
//!                                                     │ write_to
//!                                                     ▼
//!                                         magic│fmt│codec│…│meta│offsets
//! ```
//!
//! `close()` cuts the residual head and reorders overlapping blocks;
//! `iterator()` composes per-block streaming decoders plus a head snapshot
//! into one merged, time-clamped stream; `rebound()` rebuilds a chunk
//! restricted to a time range.

pub mod chunk;
pub mod compression;
pub mod head;
pub mod iter;
pub mod iterator;
pub mod pipeline;
pub mod pool;
pub mod stats;
pub mod symbolizer;

pub use chunk::{Block, Chunk, DEFAULT_BLOCK_SIZE, DEFAULT_FORMAT, FORMAT_V1, FORMAT_V2, FORMAT_V3, FORMAT_V4};
pub use compression::Codec;
pub use head::HeadBlockFmt;
pub use iter::{Direction, IterEntry, IterOptions, IterSample};
pub use pipeline::{NoopPipeline, Pipeline, SampleExtractor};
pub use stats::{ChunkStats, StatsContext};
pub use symbolizer::{Symbol, Symbolizer};

pub use loghouse_core::{Entry, Error, Label, Labels, Result};
