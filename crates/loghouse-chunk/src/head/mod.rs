//! Head Blocks
//!
//! The head is the mutable region of a chunk: appends land here until the
//! accumulated raw line bytes reach the chunk's block-size target, at which
//! point the chunk *cuts* - the head serializes itself into a sealed block
//! and resets.
//!
//! Three variants exist, selected per chunk:
//!
//! - **Ordered**: rejects any timestamp older than its current maximum
//!   (`OutOfOrder`); the cheapest variant when the writer guarantees order
//! - **Unordered**: accepts any timestamp, bucketing entries per timestamp
//!   in a `BTreeMap` so iteration and serialization come out sorted
//! - **Unordered with structured labels**: as unordered, additionally
//!   keeping each entry's structured labels as symbol references through the
//!   chunk's symbol table
//!
//! The variant tag doubles as the first byte of the head checkpoint format;
//! tags 1-3 all read as the ordered variant for checkpoints written before
//! the split between chunk formats and head formats.

mod ordered;
mod unordered;

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use loghouse_core::{Error, Labels, Result};

pub use ordered::OrderedHead;
pub use unordered::UnorderedHead;

use crate::compression::Codec;
use crate::iter::{Direction, EntryStream, IterOptions, SampleStream};
use crate::pipeline::{Pipeline, SampleExtractor};
use crate::stats::StatsContext;
use crate::symbolizer::Symbolizer;

/// Head-block variant, also the checkpoint format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum HeadBlockFmt {
    Ordered = 3,
    Unordered = 4,
    UnorderedWithStructuredLabels = 5,
}

/// Format used when the caller expresses no preference.
pub const DEFAULT_HEAD_FORMAT: HeadBlockFmt = HeadBlockFmt::Unordered;

impl HeadBlockFmt {
    pub fn byte(&self) -> u8 {
        *self as u8
    }

    /// Whether this variant keeps per-entry structured labels.
    pub fn preserves_structured_labels(&self) -> bool {
        *self == HeadBlockFmt::UnorderedWithStructuredLabels
    }
}

impl fmt::Display for HeadBlockFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HeadBlockFmt::Ordered => "ordered",
            HeadBlockFmt::Unordered => "unordered",
            HeadBlockFmt::UnorderedWithStructuredLabels => "unordered with structured labels",
        };
        f.write_str(name)
    }
}

impl TryFrom<u8> for HeadBlockFmt {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            // Tags below the split are legacy ordered-head checkpoints.
            1..=3 => Ok(HeadBlockFmt::Ordered),
            4 => Ok(HeadBlockFmt::Unordered),
            5 => Ok(HeadBlockFmt::UnorderedWithStructuredLabels),
            other => Err(Error::InvalidHeadFormat(other)),
        }
    }
}

/// The chunk's mutable head, dispatching on variant.
#[derive(Clone)]
pub enum HeadBlock {
    Ordered(OrderedHead),
    Unordered(UnorderedHead),
}

impl HeadBlock {
    pub fn new(fmt: HeadBlockFmt, symbolizer: Arc<Symbolizer>) -> Self {
        match fmt {
            HeadBlockFmt::Ordered => HeadBlock::Ordered(OrderedHead::new()),
            _ => HeadBlock::Unordered(UnorderedHead::new(fmt, symbolizer)),
        }
    }

    pub fn format(&self) -> HeadBlockFmt {
        match self {
            HeadBlock::Ordered(_) => HeadBlockFmt::Ordered,
            HeadBlock::Unordered(h) => h.format(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries() == 0
    }

    /// Number of entries currently held.
    pub fn entries(&self) -> usize {
        match self {
            HeadBlock::Ordered(h) => h.entries(),
            HeadBlock::Unordered(h) => h.entries(),
        }
    }

    /// Raw line bytes accumulated; structured labels do not count.
    pub fn uncompressed_size(&self) -> usize {
        match self {
            HeadBlock::Ordered(h) => h.uncompressed_size(),
            HeadBlock::Unordered(h) => h.uncompressed_size(),
        }
    }

    /// `(mint, maxt)`; `(0, 0)` when empty.
    pub fn bounds(&self) -> (i64, i64) {
        match self {
            HeadBlock::Ordered(h) => h.bounds(),
            HeadBlock::Unordered(h) => h.bounds(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            HeadBlock::Ordered(h) => h.reset(),
            HeadBlock::Unordered(h) => h.reset(),
        }
    }

    pub fn append(&mut self, t: i64, line: Bytes, structured: &Labels) -> Result<()> {
        match self {
            HeadBlock::Ordered(h) => h.append(t, line),
            HeadBlock::Unordered(h) => h.append(t, line, structured),
        }
    }

    /// Compress the head's entries into a sealed-block payload.
    ///
    /// Under chunk format v4 every entry carries a symbols section, empty
    /// for variants that keep no labels, so the block decoder can parse any
    /// v4 payload uniformly.
    pub fn serialise(&self, codec: Codec, chunk_format: u8) -> Result<Vec<u8>> {
        match self {
            HeadBlock::Ordered(h) => h.serialise(codec, chunk_format),
            HeadBlock::Unordered(h) => h.serialise(codec, chunk_format),
        }
    }

    /// Write the uncompressed checkpoint form (crash recovery only).
    pub fn checkpoint_to(&self, w: &mut dyn Write) -> Result<()> {
        match self {
            HeadBlock::Ordered(h) => h.checkpoint_to(w),
            HeadBlock::Unordered(h) => h.checkpoint_to(w),
        }
    }

    pub fn checkpoint_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.checkpoint_size());
        self.checkpoint_to(&mut buf)?;
        Ok(buf)
    }

    /// Estimated checkpoint size; an upper bound, never less than actual.
    pub fn checkpoint_size(&self) -> usize {
        match self {
            HeadBlock::Ordered(h) => h.checkpoint_size(),
            HeadBlock::Unordered(h) => h.checkpoint_size(),
        }
    }

    /// Restore a head from checkpoint bytes.
    ///
    /// Legacy ordered checkpoints are converted to `desired`; unordered
    /// checkpoints keep their own format.
    pub fn from_checkpoint(
        b: &[u8],
        desired: HeadBlockFmt,
        symbolizer: Arc<Symbolizer>,
    ) -> Result<HeadBlock> {
        if b.is_empty() {
            return Ok(HeadBlock::new(desired, symbolizer));
        }

        let tag = b[0];
        let mut cursor = &b[1..];
        match HeadBlockFmt::try_from(tag)? {
            HeadBlockFmt::Ordered => {
                let head = HeadBlock::Ordered(OrderedHead::load(&mut cursor)?);
                if desired >= HeadBlockFmt::Unordered {
                    head.convert(desired, &symbolizer)
                } else {
                    Ok(head)
                }
            }
            fmt => Ok(HeadBlock::Unordered(UnorderedHead::load(
                &mut cursor,
                fmt,
                symbolizer,
            )?)),
        }
    }

    /// Re-append every entry into a head of the target format.
    pub fn convert(
        &self,
        desired: HeadBlockFmt,
        symbolizer: &Arc<Symbolizer>,
    ) -> Result<HeadBlock> {
        if desired == self.format() {
            return Ok(self.clone());
        }
        let mut out = HeadBlock::new(desired, Arc::clone(symbolizer));
        match self {
            HeadBlock::Ordered(h) => {
                for (t, line) in h.iter() {
                    out.append(t, line.clone(), &Labels::new())?;
                }
            }
            HeadBlock::Unordered(h) => {
                let mut result = Ok(());
                h.for_each(Direction::Forward, i64::MIN, i64::MAX, &mut |t, line, symbols| {
                    if result.is_err() {
                        return;
                    }
                    let structured = h.resolve(symbols);
                    result = out.append(t, line.clone(), &structured);
                });
                result?;
            }
        }
        Ok(out)
    }

    /// Snapshot iterator over the head under a pipeline.
    ///
    /// The head is processed eagerly at construction, so appends racing a
    /// long-lived iterator never alias its backing storage.
    pub fn iterator(
        &self,
        stats: &StatsContext,
        direction: Direction,
        mint: i64,
        maxt: i64,
        pipeline: &Arc<dyn Pipeline>,
        options: IterOptions,
    ) -> EntryStream {
        match self {
            HeadBlock::Ordered(h) => h.iterator(stats, direction, mint, maxt, pipeline),
            HeadBlock::Unordered(h) => h.iterator(stats, direction, mint, maxt, pipeline, options),
        }
    }

    /// Snapshot sample iterator over the head.
    pub fn sample_iterator(
        &self,
        stats: &StatsContext,
        mint: i64,
        maxt: i64,
        extractor: &Arc<dyn SampleExtractor>,
    ) -> SampleStream {
        match self {
            HeadBlock::Ordered(h) => h.sample_iterator(stats, mint, maxt, extractor),
            HeadBlock::Unordered(h) => h.sample_iterator(stats, mint, maxt, extractor),
        }
    }
}
