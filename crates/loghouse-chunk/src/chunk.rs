//! Chunk Codec - Binary Framing and Operations
//!
//! A chunk's wire form is self-describing: magic number, format version,
//! codec byte (v2+), then the sections. Four format versions are readable;
//! writes use the configured format (v3 unless overridden).
//!
//! ```text
//! v1-v3:  magic │ version │ [codec] │ block payload ┆ crc │ ... │ meta │ crc │ meta_offset(8)
//! v4:     magic │ version │ codec │ symtab │ crc │ block ┆ crc │ ... │ meta │ crc
//!              │ labels_len(8) │ labels_offset(8) │ meta_len(8) │ meta_offset(8)
//! ```
//!
//! The trailing length/offset pairs are addressed from the end of the file:
//! pair 1 (the last 16 bytes) locates the meta section, pair 2 the symbol
//! table. Versions below v4 store only the 8-byte meta offset; the meta
//! length is recovered by arithmetic. All checksums are CRC32-Castagnoli.
//!
//! On read, a block whose payload fails its CRC is skipped with a logged
//! error and the rest of the chunk still loads; a failed meta or
//! symbol-table CRC is fatal.
//!
//! ## Write Path
//!
//! `append` forwards to the head; when the head's raw line bytes reach the
//! block-size target the chunk cuts it into a sealed block. `close` cuts the
//! residual head and, if sealed blocks overlap (unordered head formats),
//! rebuilds the chunk via `rebound` so blocks come out globally ascending.
//! `write_to` emits sealed blocks only - the head is never part of the main
//! wire form, which keeps flushed chunks content-addressable regardless of
//! checkpoint timing. Callers wanting durability for the head write the
//! separate checkpoint stream (`serialize_for_checkpoint`).

use std::io::Write;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISCSI};
use loghouse_core::entry::labels_size;
use loghouse_core::varint::{
    decode_uvarint, decode_varint, encode_uvarint, encode_varint, MAX_VARINT_LEN,
};
use loghouse_core::{Entry, Error, Labels, Result};
use tracing::error;

use crate::compression::Codec;
use crate::head::{HeadBlock, HeadBlockFmt, DEFAULT_HEAD_FORMAT};
use crate::iter::{
    self, Direction, EntryStream, IterOptions, Reversed, SampleStream, SortMerge, TimeRanged,
};
use crate::iterator::{new_entry_iterator, new_sample_iterator};
use crate::pipeline::{NoopPipeline, Pipeline, SampleExtractor};
use crate::stats::{ChunkStats, StatsContext};
use crate::symbolizer::Symbolizer;

pub const MAGIC: u32 = 0x012E_E56A;

pub const FORMAT_V1: u8 = 1;
pub const FORMAT_V2: u8 = 2;
pub const FORMAT_V3: u8 = 3;
pub const FORMAT_V4: u8 = 4;

/// Format used by writes unless overridden.
pub const DEFAULT_FORMAT: u8 = FORMAT_V3;

/// Block-size target applied when rebuilding a chunk that has none recorded.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Decoded line lengths at or above this are rejected.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024 * 1024;

/// Without a target size, admission stops at this many sealed blocks.
const BLOCKS_PER_CHUNK: usize = 10;

/// Trailing section indices, addressed from the end of the chunk.
const META_SECTION_IDX: usize = 1;
const LABELS_SECTION_IDX: usize = 2;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// CRC32-Castagnoli of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    CASTAGNOLI.checksum(data)
}

/// An immutable sealed block: compressed entries plus bookkeeping.
#[derive(Debug, Clone)]
pub struct Block {
    /// Compressed payload.
    data: Bytes,
    entries: usize,
    mint: i64,
    maxt: i64,
    /// Byte position of the payload within the chunk, set during writes.
    offset: usize,
    /// Uncompressed size recorded when the head was cut (v3+ on the wire).
    uncompressed_size: usize,
}

impl Block {
    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn min_time(&self) -> i64 {
        self.mint
    }

    pub fn max_time(&self) -> i64 {
        self.maxt
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn uncompressed_size(&self) -> usize {
        self.uncompressed_size
    }

    pub fn compressed_len(&self) -> usize {
        self.data.len()
    }
}

/// A compressed log chunk: sealed blocks, a mutable head and (v4) a symbol
/// table, with the framing to round-trip through object storage.
pub struct Chunk {
    /// Uncompressed bytes per sealed block.
    block_size: usize,
    /// Target compressed chunk size; 0 disables the size-based admission.
    target_size: usize,

    symbolizer: Arc<Symbolizer>,
    blocks: Vec<Block>,
    /// Compressed bytes across all sealed blocks.
    cut_block_size: usize,

    head: HeadBlock,

    format: u8,
    codec: Codec,
    /// Configured head format; `None` on chunks read back from storage,
    /// whose head is a placeholder.
    head_fmt: Option<HeadBlockFmt>,

    /// Serialized size, set by the last write or the decoded input length.
    compressed_size: usize,
}

impl Chunk {
    /// New empty chunk using the default write format.
    pub fn new(codec: Codec, head_fmt: HeadBlockFmt, block_size: usize, target_size: usize) -> Self {
        let symbolizer = Arc::new(Symbolizer::new());
        Self {
            block_size,
            target_size,
            head: HeadBlock::new(head_fmt, Arc::clone(&symbolizer)),
            symbolizer,
            blocks: Vec::new(),
            cut_block_size: 0,
            format: DEFAULT_FORMAT,
            codec,
            head_fmt: Some(head_fmt),
            compressed_size: 0,
        }
    }

    /// New empty chunk with an explicit format version.
    pub fn with_format(
        format: u8,
        codec: Codec,
        head_fmt: HeadBlockFmt,
        block_size: usize,
        target_size: usize,
    ) -> Result<Self> {
        if !(FORMAT_V1..=FORMAT_V4).contains(&format) {
            return Err(Error::InvalidVersion(format));
        }
        if format == FORMAT_V1 && codec != Codec::Gzip {
            // v1 has no codec byte; readers assume gzip.
            return Err(Error::InvalidCodec(codec as u8));
        }
        let mut c = Self::new(codec, head_fmt, block_size, target_size);
        c.format = format;
        Ok(c)
    }

    /// Decode a chunk from its wire form.
    pub fn from_bytes(b: Bytes, block_size: usize, target_size: usize) -> Result<Self> {
        Self::decode(b, block_size, target_size, false)
    }

    fn decode(b: Bytes, block_size: usize, target_size: usize, from_checkpoint: bool) -> Result<Self> {
        let data: &[u8] = &b;
        if data.len() < 5 {
            return Err(Error::InvalidData("chunk too short".to_string()));
        }

        let mut cursor = data;
        let magic = cursor.get_u32();
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }
        let version = cursor.get_u8();
        let codec = match version {
            FORMAT_V1 => Codec::Gzip,
            FORMAT_V2 | FORMAT_V3 | FORMAT_V4 => {
                if cursor.remaining() < 1 {
                    return Err(Error::InvalidData("chunk too short".to_string()));
                }
                Codec::try_from(cursor.get_u8())?
            }
            v => return Err(Error::InvalidVersion(v)),
        };

        // Trailing length/offset pairs, indexed backwards from the end.
        let section_pair = |idx: usize| -> Result<(usize, usize)> {
            let pos = data
                .len()
                .checked_sub(idx * 16)
                .ok_or_else(|| Error::InvalidData("chunk too short for trailer".to_string()))?;
            let mut p = &data[pos..pos + 16];
            Ok((p.get_u64() as usize, p.get_u64() as usize))
        };

        let (metas_len, metas_offset) = if version >= FORMAT_V4 {
            section_pair(META_SECTION_IDX)?
        } else {
            if data.len() < 12 {
                return Err(Error::InvalidData("chunk too short for trailer".to_string()));
            }
            let offset = (&data[data.len() - 8..]).get_u64() as usize;
            let len = (data.len() - 12)
                .checked_sub(offset)
                .ok_or_else(|| Error::InvalidData("meta offset out of bounds".to_string()))?;
            (len, offset)
        };

        let meta_end = metas_offset
            .checked_add(metas_len)
            .filter(|end| end.checked_add(4).is_some_and(|e| e <= data.len()))
            .ok_or_else(|| Error::InvalidData("meta section out of bounds".to_string()))?;
        let mb = &data[metas_offset..meta_end];
        let expected = (&data[meta_end..meta_end + 4]).get_u32();
        if expected != crc32(mb) {
            return Err(Error::InvalidChecksum);
        }

        let mut blocks = Vec::new();
        let mut cut_block_size = 0usize;
        let mut mc = mb;
        let num = decode_uvarint(&mut mc)? as usize;
        for _ in 0..num {
            let entries = decode_uvarint(&mut mc)? as usize;
            let mint = decode_varint(&mut mc)?;
            let maxt = decode_varint(&mut mc)?;
            let offset = decode_uvarint(&mut mc)? as usize;
            let uncompressed_size = if version >= FORMAT_V3 {
                decode_uvarint(&mut mc)? as usize
            } else {
                0
            };
            let len = decode_uvarint(&mut mc)? as usize;

            let end = offset
                .checked_add(len)
                .filter(|end| end.checked_add(4).is_some_and(|e| e <= data.len()))
                .ok_or_else(|| Error::InvalidData("block out of bounds".to_string()))?;
            let payload = b.slice(offset..end);
            let expected = (&data[end..end + 4]).get_u32();
            if expected != crc32(&payload) {
                error!(
                    offset,
                    "checksum does not match for a block in chunk, the block will be skipped"
                );
                continue;
            }

            cut_block_size += payload.len();
            blocks.push(Block {
                data: payload,
                entries,
                mint,
                maxt,
                offset,
                uncompressed_size,
            });
        }

        let symbolizer = if version >= FORMAT_V4 {
            let (labels_len, labels_offset) = section_pair(LABELS_SECTION_IDX)?;
            let labels_end = labels_offset
                .checked_add(labels_len)
                .filter(|end| end.checked_add(4).is_some_and(|e| e <= data.len()))
                .ok_or_else(|| Error::InvalidData("symbol table out of bounds".to_string()))?;
            let lb = &data[labels_offset..labels_end];
            let expected = (&data[labels_end..labels_end + 4]).get_u32();
            if expected != crc32(lb) {
                return Err(Error::InvalidChecksum);
            }
            if from_checkpoint {
                Symbolizer::from_checkpoint(lb)?
            } else {
                Symbolizer::from_wire(b.slice(labels_offset..labels_end), codec)?
            }
        } else {
            Symbolizer::new()
        };
        let symbolizer = Arc::new(symbolizer);

        Ok(Chunk {
            block_size,
            target_size,
            head: HeadBlock::new(HeadBlockFmt::Ordered, Arc::clone(&symbolizer)),
            symbolizer,
            blocks,
            cut_block_size,
            format: version,
            codec,
            head_fmt: None,
            compressed_size: b.len(),
        })
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn format(&self) -> u8 {
        self.format
    }

    /// Configured head format, `None` for chunks read from storage.
    pub fn head_format(&self) -> Option<HeadBlockFmt> {
        self.head_fmt
    }

    /// Total entries, sealed blocks plus head.
    pub fn size(&self) -> usize {
        self.blocks.iter().map(|b| b.entries).sum::<usize>() + self.head.entries()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Sealed blocks overlapping `[from, to]`.
    pub fn blocks(&self, from: i64, to: i64) -> Vec<&Block> {
        self.blocks
            .iter()
            .filter(|b| to >= b.mint && b.maxt >= from)
            .collect()
    }

    /// `(mint, maxt)` across the head and every sealed block, in nanoseconds.
    pub fn bounds(&self) -> (i64, i64) {
        let (mut from, mut to) = self.head.bounds();
        // Blocks may overlap under unordered head formats; scan them all.
        for b in &self.blocks {
            if from == 0 || from > b.mint {
                from = b.mint;
            }
            if to < b.maxt {
                to = b.maxt;
            }
        }
        (from, to)
    }

    /// Whether appending `entry` keeps the chunk within its configured size.
    ///
    /// With a target size this deliberately weighs the *uncompressed* head
    /// against the *compressed* budget: a conservative overestimate, so the
    /// chunk never exceeds the target in practice.
    pub fn space_for(&self, entry: &Entry) -> bool {
        if self.target_size > 0 {
            let mut new_head_size = self.head.uncompressed_size() + entry.line.len();
            let mut symbols_size = 0;
            if self.format >= FORMAT_V4 {
                new_head_size += labels_size(&entry.structured);
                // Labels are compressed while serializing the chunk, so their
                // post-compression size is unknown here; charge them raw.
                symbols_size = self.symbolizer.uncompressed_size();
            }
            return symbols_size + self.cut_block_size + new_head_size < self.target_size;
        }
        self.blocks.len() < BLOCKS_PER_CHUNK
    }

    /// Uncompressed bytes held: head, block line data and (v4) symbols.
    pub fn uncompressed_size(&self) -> usize {
        let mut size = self.head.uncompressed_size();
        size += self.blocks.iter().map(|b| b.uncompressed_size).sum::<usize>();
        if self.format >= FORMAT_V4 {
            size += self.symbolizer.uncompressed_size();
        }
        size
    }

    /// Serialized size: the recorded value when the chunk has been written
    /// or read, otherwise a best-effort account of live data.
    pub fn compressed_size(&self) -> usize {
        if self.compressed_size != 0 {
            return self.compressed_size;
        }
        let mut size = self.head.uncompressed_size();
        if self.format >= FORMAT_V4 {
            size += self.symbolizer.uncompressed_size();
        }
        size + self.cut_block_size
    }

    /// Fraction of the configured budget in use.
    pub fn utilization(&self) -> f64 {
        if self.target_size != 0 {
            return self.compressed_size() as f64 / self.target_size as f64;
        }
        self.uncompressed_size() as f64 / (BLOCKS_PER_CHUNK * self.block_size) as f64
    }

    /// Append one entry. Structured labels are dropped below format v4.
    pub fn append(&mut self, entry: &Entry) -> Result<()> {
        let t = entry.t;

        // An ordered chunk whose head was just cut must still reject entries
        // older than the last sealed block.
        if self.head_fmt.unwrap_or(HeadBlockFmt::Ordered) < HeadBlockFmt::Unordered
            && self.head.is_empty()
            && self.blocks.last().is_some_and(|b| b.maxt > t)
        {
            return Err(Error::OutOfOrder);
        }

        let empty = Labels::new();
        let structured = if self.format < FORMAT_V4 {
            &empty
        } else {
            &entry.structured
        };
        self.head.append(t, entry.line.clone(), structured)?;

        if self.head.uncompressed_size() >= self.block_size {
            return self.cut();
        }
        Ok(())
    }

    /// Serialize the head into a sealed block and reset it. No-op when empty.
    fn cut(&mut self) -> Result<()> {
        if self.head.is_empty() {
            return Ok(());
        }

        let payload = self.head.serialise(self.codec, self.format)?;
        let (mint, maxt) = self.head.bounds();
        self.cut_block_size += payload.len();
        self.blocks.push(Block {
            data: Bytes::from(payload),
            entries: self.head.entries(),
            mint,
            maxt,
            offset: 0,
            uncompressed_size: self.head.uncompressed_size(),
        });

        self.head.reset();
        Ok(())
    }

    /// Cut the residual head and restore global block order.
    pub fn close(&mut self) -> Result<()> {
        self.cut()?;
        self.reorder()
    }

    /// Rebuild the chunk when sealed blocks overlap, so blocks come out
    /// monotonically increasing.
    fn reorder(&mut self) -> Result<()> {
        let mut last_max = i64::MIN;
        let mut ordered = true;
        for b in &self.blocks {
            if b.mint < last_max {
                ordered = false;
            }
            last_max = b.maxt;
        }
        if ordered {
            return Ok(());
        }

        let (from, to) = self.bounds();
        let rebuilt = self.rebound(from, to, None)?;
        *self = rebuilt;
        Ok(())
    }

    /// Convert the live head to another format.
    pub fn convert_head(&mut self, desired: HeadBlockFmt) -> Result<()> {
        if self.head.format() != desired {
            self.head = self.head.convert(desired, &self.symbolizer)?;
        }
        self.head_fmt = Some(desired);
        Ok(())
    }

    /// Estimated wire size; an upper bound (varints charged at full width).
    pub fn bytes_size(&self) -> usize {
        let mut size = 4 + 1; // magic + format
        if self.format > FORMAT_V1 {
            size += 1; // codec byte
        }

        for b in &self.blocks {
            size += b.data.len() + 4; // payload + crc
            size += MAX_VARINT_LEN; // entry count
            size += MAX_VARINT_LEN * 2; // mint, maxt
            size += MAX_VARINT_LEN; // offset
            if self.format >= FORMAT_V3 {
                size += MAX_VARINT_LEN; // uncompressed size
            }
            size += MAX_VARINT_LEN; // payload length
        }

        size += MAX_VARINT_LEN; // block count
        size += 4; // meta crc
        size += 8; // meta offset

        if self.format >= FORMAT_V4 {
            size += 8; // meta length
            size += self.symbolizer.checkpoint_size() + 4; // symbol table + crc
            size += 16; // symbol table length + offset
        }
        size
    }

    /// Write the chunk's wire form. The head is not included; call
    /// [`Chunk::close`] first if its entries must be part of the output.
    pub fn write_to(&mut self, w: &mut dyn Write) -> Result<u64> {
        self.write_to_impl(w, false)
    }

    fn write_to_impl(&mut self, w: &mut dyn Write, for_checkpoint: bool) -> Result<u64> {
        let mut offset = 0usize;
        let mut eb = BytesMut::new();

        eb.put_u32(MAGIC);
        eb.put_u8(self.format);
        if self.format > FORMAT_V1 {
            eb.put_u8(self.codec as u8);
        }
        w.write_all(&eb)?;
        offset += eb.len();

        // The symbol table precedes the blocks so a checkpointed head, which
        // is serialized before the chunk body, never references symbols the
        // table has yet to record.
        let labels_offset = offset;
        let mut labels_len = 0usize;
        if self.format >= FORMAT_V4 {
            let (n, crc) = if for_checkpoint {
                self.symbolizer.checkpoint_to(w)?
            } else {
                self.symbolizer.serialize_to(w, self.codec)?
            };
            labels_len = n;
            offset += n;
            w.write_all(&crc)?;
            offset += crc.len();
        }

        for block in &mut self.blocks {
            block.offset = offset;
            w.write_all(&block.data)?;
            w.write_all(&crc32(&block.data).to_be_bytes())?;
            offset += block.data.len() + 4;
        }

        let metas_offset = offset;
        eb.clear();
        encode_uvarint(&mut eb, self.blocks.len() as u64);
        for b in &self.blocks {
            encode_uvarint(&mut eb, b.entries as u64);
            encode_varint(&mut eb, b.mint);
            encode_varint(&mut eb, b.maxt);
            encode_uvarint(&mut eb, b.offset as u64);
            if self.format >= FORMAT_V3 {
                encode_uvarint(&mut eb, b.uncompressed_size as u64);
            }
            encode_uvarint(&mut eb, b.data.len() as u64);
        }
        let metas_len = eb.len();
        let crc = crc32(&eb);
        eb.put_u32(crc);
        w.write_all(&eb)?;
        offset += eb.len();

        if self.format >= FORMAT_V4 {
            eb.clear();
            eb.put_u64(labels_len as u64);
            eb.put_u64(labels_offset as u64);
            w.write_all(&eb)?;
            offset += eb.len();
        }

        eb.clear();
        if self.format >= FORMAT_V4 {
            eb.put_u64(metas_len as u64);
        }
        eb.put_u64(metas_offset as u64);
        w.write_all(&eb)?;
        offset += eb.len();

        self.compressed_size = offset;
        Ok(offset as u64)
    }

    /// The chunk's wire form as a buffer.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.bytes_size());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Serialize chunk and head into separate writers for checkpointing.
    ///
    /// The head goes first: appends record new symbols before the entry
    /// lands in the head, so serializing the chunk (and with it the symbol
    /// table) afterwards guarantees every head reference resolves.
    pub fn serialize_for_checkpoint(
        &mut self,
        chunk_w: &mut dyn Write,
        head_w: &mut dyn Write,
    ) -> Result<()> {
        self.head.checkpoint_to(head_w)?;
        self.write_to_impl(chunk_w, true)?;
        Ok(())
    }

    /// Estimated `(chunk, head)` checkpoint sizes.
    pub fn checkpoint_size(&self) -> (usize, usize) {
        (self.bytes_size(), self.head.checkpoint_size())
    }

    /// Restore a chunk from its checkpoint pair.
    ///
    /// Ordered head checkpoints are converted to `desired_head`; unordered
    /// ones keep their own format.
    pub fn from_checkpoint(
        chunk_bytes: Bytes,
        head_bytes: &[u8],
        desired_head: HeadBlockFmt,
        block_size: usize,
        target_size: usize,
    ) -> Result<Self> {
        let mut c = Self::decode(chunk_bytes, block_size, target_size, true)?;
        let head =
            HeadBlock::from_checkpoint(head_bytes, desired_head, Arc::clone(&c.symbolizer))?;
        c.head_fmt = Some(head.format());
        c.head = head;
        Ok(c)
    }

    /// Merged, time-clamped iterator over `[from, to)` under a pipeline.
    pub fn iterator(
        &self,
        stats: &StatsContext,
        from: i64,
        to: i64,
        direction: Direction,
        pipeline: Arc<dyn Pipeline>,
        options: IterOptions,
    ) -> EntryStream {
        if self.format >= FORMAT_V4 {
            stats.add_compressed_bytes(self.symbolizer.compressed_size() as u64);
            let decompressed = self.symbolizer.decompressed_size() as u64;
            stats.add_decompressed_bytes(decompressed);
            stats.add_decompressed_structured_bytes(decompressed);
        }

        let mut block_iters: Vec<EntryStream> = Vec::with_capacity(self.blocks.len() + 1);
        let mut last_max = i64::MIN;
        let mut ordered = true;
        for b in &self.blocks {
            if to < b.mint || b.maxt < from {
                continue;
            }
            if b.mint < last_max {
                ordered = false;
            }
            last_max = b.maxt;
            block_iters.push(new_entry_iterator(
                Arc::clone(stats),
                self.codec,
                b.data.clone(),
                self.format,
                Arc::clone(&self.symbolizer),
                Arc::clone(&pipeline),
                options,
            ));
        }

        let head_iter = if !self.head.is_empty() {
            let (head_mint, _) = self.head.bounds();
            if head_mint < last_max {
                ordered = false;
            }
            Some(self.head.iterator(stats, direction, from, to, &pipeline, options))
        } else {
            None
        };

        match direction {
            Direction::Forward => {
                if let Some(h) = head_iter {
                    block_iters.push(h);
                }
                let merged = if ordered {
                    iter::concat(block_iters)
                } else {
                    SortMerge::boxed(block_iters, Direction::Forward)
                };
                TimeRanged::boxed(merged, from, to)
            }
            Direction::Backward => {
                // Clamp and reverse each naturally-ascending block stream in
                // isolation; the head emits reversed natively.
                let mut iters: Vec<EntryStream> = block_iters
                    .into_iter()
                    .map(|it| Reversed::boxed(TimeRanged::boxed(it, from, to)))
                    .collect();
                if let Some(h) = head_iter {
                    iters.push(h);
                }
                iters.reverse();
                if ordered {
                    iter::concat(iters)
                } else {
                    SortMerge::boxed(iters, Direction::Backward)
                }
            }
        }
    }

    /// Merged sample iterator over `[from, to)` under an extractor.
    pub fn sample_iterator(
        &self,
        stats: &StatsContext,
        from: i64,
        to: i64,
        extractor: Arc<dyn SampleExtractor>,
    ) -> SampleStream {
        if self.format >= FORMAT_V4 {
            stats.add_compressed_bytes(self.symbolizer.compressed_size() as u64);
            let decompressed = self.symbolizer.decompressed_size() as u64;
            stats.add_decompressed_bytes(decompressed);
            stats.add_decompressed_structured_bytes(decompressed);
        }

        let mut iters: Vec<SampleStream> = Vec::with_capacity(self.blocks.len() + 1);
        let mut last_max = i64::MIN;
        let mut ordered = true;
        for b in &self.blocks {
            if to < b.mint || b.maxt < from {
                continue;
            }
            if b.mint < last_max {
                ordered = false;
            }
            last_max = b.maxt;
            iters.push(new_sample_iterator(
                Arc::clone(stats),
                self.codec,
                b.data.clone(),
                self.format,
                Arc::clone(&self.symbolizer),
                Arc::clone(&extractor),
            ));
        }

        if !self.head.is_empty() {
            let (head_mint, _) = self.head.bounds();
            if head_mint < last_max {
                ordered = false;
            }
            iters.push(self.head.sample_iterator(stats, from, to, &extractor));
        }

        let merged = if ordered {
            iter::concat(iters)
        } else {
            SortMerge::boxed(iters, Direction::Forward)
        };
        TimeRanged::boxed(merged, from, to)
    }

    /// Build a new chunk holding exactly the entries in `[start, end]` (both
    /// inclusive) that `filter` does not reject (`true` drops the entry).
    ///
    /// Fails with [`Error::NoDataInRange`] when nothing survives. The result
    /// is closed before being returned.
    pub fn rebound(
        &self,
        start: i64,
        end: i64,
        filter: Option<&dyn Fn(i64, &[u8]) -> bool>,
    ) -> Result<Chunk> {
        let stats = ChunkStats::new_context();
        // The iterator's upper bound is exclusive; one millisecond past `end`
        // makes the rebound inclusive.
        let it = self.iterator(
            &stats,
            start,
            end.saturating_add(1_000_000),
            Direction::Forward,
            Arc::new(NoopPipeline),
            IterOptions {
                keep_structured_labels: true,
            },
        );

        // Chunks read from storage have a placeholder head; rebuild those
        // with the default head format.
        let head_fmt = self.head_fmt.unwrap_or(DEFAULT_HEAD_FORMAT);

        // Respect the recorded block/target sizes where present. A chunk
        // decoded without them gets the default block size and, for the
        // target, its own compressed size - the rebuilt chunk can only be
        // smaller than the original.
        let mut rebuilt = if self.block_size > 0 {
            Chunk::new(self.codec, head_fmt, self.block_size, self.target_size)
        } else {
            Chunk::new(self.codec, head_fmt, DEFAULT_BLOCK_SIZE, self.compressed_size())
        };

        for item in it {
            let e = item?;
            if let Some(reject) = filter {
                if reject(e.t, &e.line) {
                    continue;
                }
            }
            rebuilt.append(&Entry::new(e.t, e.line, e.structured))?;
        }

        if rebuilt.size() == 0 {
            return Err(Error::NoDataInRange);
        }

        rebuilt.close()?;
        Ok(rebuilt)
    }
}
