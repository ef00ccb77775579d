//! Unordered Head Block
//!
//! Accepts appends in any timestamp order. Entries are bucketed per
//! timestamp in a `BTreeMap`, which gives O(log n) appends and lets
//! iteration and serialization walk the block in time order without a sort
//! pass. Entries sharing a timestamp keep append order ascending and
//! reverse-append order descending.
//!
//! The with-structured-labels variant additionally interns each entry's
//! labels through the chunk's symbol table at append time and stores the
//! `(name_idx, value_idx)` references.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use loghouse_core::varint::{
    decode_uvarint, decode_varint, encode_uvarint, encode_varint, uvarint_len, MAX_VARINT_LEN,
};
use loghouse_core::{Error, Labels, Result};
use xxhash_rust::xxh64::xxh64;

use crate::chunk::FORMAT_V4;
use crate::compression::Codec;
use crate::head::HeadBlockFmt;
use crate::iter::{Direction, EntryStream, IterEntry, IterOptions, IterSample, SampleStream};
use crate::pipeline::{Pipeline, SampleExtractor};
use crate::stats::StatsContext;
use crate::symbolizer::{Symbol, Symbolizer};

#[derive(Clone)]
struct BucketEntry {
    line: Bytes,
    symbols: Vec<Symbol>,
}

/// Head block accepting out-of-order appends.
#[derive(Clone)]
pub struct UnorderedHead {
    format: HeadBlockFmt,
    symbolizer: Arc<Symbolizer>,
    /// Entries bucketed per timestamp, append order within a bucket.
    index: BTreeMap<i64, Vec<BucketEntry>>,
    count: usize,
    /// Raw line bytes held.
    size: usize,
    mint: i64,
    maxt: i64,
}

impl UnorderedHead {
    pub fn new(format: HeadBlockFmt, symbolizer: Arc<Symbolizer>) -> Self {
        debug_assert!(format >= HeadBlockFmt::Unordered);
        Self {
            format,
            symbolizer,
            index: BTreeMap::new(),
            count: 0,
            size: 0,
            mint: 0,
            maxt: 0,
        }
    }

    pub fn format(&self) -> HeadBlockFmt {
        self.format
    }

    pub fn entries(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn uncompressed_size(&self) -> usize {
        self.size
    }

    pub fn bounds(&self) -> (i64, i64) {
        (self.mint, self.maxt)
    }

    pub fn reset(&mut self) {
        self.index.clear();
        self.count = 0;
        self.size = 0;
        self.mint = 0;
        self.maxt = 0;
    }

    pub fn append(&mut self, t: i64, line: Bytes, structured: &Labels) -> Result<()> {
        let symbols = if self.format.preserves_structured_labels() && !structured.is_empty() {
            self.symbolizer.add(structured)
        } else {
            Vec::new()
        };
        self.push_raw(t, line, symbols);
        Ok(())
    }

    fn push_raw(&mut self, t: i64, line: Bytes, symbols: Vec<Symbol>) {
        if self.mint == 0 || self.mint > t {
            self.mint = t;
        }
        if self.maxt < t {
            self.maxt = t;
        }
        self.size += line.len();
        self.count += 1;
        self.index
            .entry(t)
            .or_default()
            .push(BucketEntry { line, symbols });
    }

    pub(super) fn resolve(&self, symbols: &[Symbol]) -> Labels {
        if symbols.is_empty() {
            return Labels::new();
        }
        self.symbolizer.lookup(symbols)
    }

    /// Visit entries with `mint <= t < maxt` in the given direction.
    pub(super) fn for_each(
        &self,
        direction: Direction,
        mint: i64,
        maxt: i64,
        f: &mut dyn FnMut(i64, &Bytes, &[Symbol]),
    ) {
        match direction {
            Direction::Forward => {
                for (t, bucket) in self.index.range(mint..maxt) {
                    for e in bucket {
                        f(*t, &e.line, &e.symbols);
                    }
                }
            }
            Direction::Backward => {
                for (t, bucket) in self.index.range(mint..maxt).rev() {
                    for e in bucket.iter().rev() {
                        f(*t, &e.line, &e.symbols);
                    }
                }
            }
        }
    }

    pub fn serialise(&self, codec: Codec, chunk_format: u8) -> Result<Vec<u8>> {
        let mut raw = BytesMut::with_capacity(self.size + self.count * 8);
        let mut section = BytesMut::new();

        self.for_each(Direction::Forward, i64::MIN, i64::MAX, &mut |t, line, symbols| {
            encode_varint(&mut raw, t);
            encode_uvarint(&mut raw, line.len() as u64);
            raw.put_slice(line);
            if chunk_format >= FORMAT_V4 {
                section.clear();
                encode_symbols_section(&mut section, symbols);
                raw.put_slice(&section);
            }
        });

        let mut w = codec.writer()?;
        w.write_all(&raw)
            .map_err(|e| Error::Compression(e.to_string()))?;
        w.finish()
    }

    pub fn checkpoint_to(&self, w: &mut dyn Write) -> Result<()> {
        let mut buf = BytesMut::with_capacity(self.checkpoint_size());

        buf.put_u8(self.format.byte());
        encode_uvarint(&mut buf, self.count as u64);
        encode_uvarint(&mut buf, self.size as u64);
        encode_varint(&mut buf, self.mint);
        encode_varint(&mut buf, self.maxt);

        self.for_each(Direction::Forward, i64::MIN, i64::MAX, &mut |t, line, symbols| {
            encode_varint(&mut buf, t);
            encode_uvarint(&mut buf, line.len() as u64);
            buf.put_slice(line);
            if self.format.preserves_structured_labels() {
                encode_symbols_section(&mut buf, symbols);
            }
        });

        w.write_all(&buf)?;
        Ok(())
    }

    pub fn checkpoint_size(&self) -> usize {
        let mut size = 1; // format tag
        size += MAX_VARINT_LEN * 2; // entry count + uncompressed size
        size += MAX_VARINT_LEN * 2; // mint, maxt
        size += MAX_VARINT_LEN * 2 * self.count; // ts + line length
        size += self.size;
        if self.format.preserves_structured_labels() {
            for bucket in self.index.values() {
                for e in bucket {
                    size += MAX_VARINT_LEN * (2 + 2 * e.symbols.len());
                }
            }
        }
        size
    }

    /// Parse checkpoint bytes positioned after the format tag.
    pub(super) fn load(
        cursor: &mut &[u8],
        format: HeadBlockFmt,
        symbolizer: Arc<Symbolizer>,
    ) -> Result<UnorderedHead> {
        let count = decode_uvarint(cursor)? as usize;
        let _size = decode_uvarint(cursor)? as usize;
        let _mint = decode_varint(cursor)?;
        let _maxt = decode_varint(cursor)?;

        // Bounds and size are recomputed while re-inserting; the prefix is
        // kept for format compatibility.
        let mut head = UnorderedHead::new(format, symbolizer);
        for _ in 0..count {
            let t = decode_varint(cursor)?;
            let len = decode_uvarint(cursor)? as usize;
            if cursor.len() < len {
                return Err(Error::InvalidData(
                    "truncated head checkpoint entry".to_string(),
                ));
            }
            let line = Bytes::copy_from_slice(&cursor[..len]);
            *cursor = &cursor[len..];

            let symbols = if format.preserves_structured_labels() {
                decode_symbols_section(cursor)?
            } else {
                Vec::new()
            };
            head.push_raw(t, line, symbols);
        }

        Ok(head)
    }

    pub fn iterator(
        &self,
        stats: &StatsContext,
        direction: Direction,
        mint: i64,
        maxt: i64,
        pipeline: &Arc<dyn Pipeline>,
        options: IterOptions,
    ) -> EntryStream {
        if self.is_empty() || maxt < self.mint || self.maxt < mint {
            return crate::iter::empty();
        }

        stats.add_head_chunk_lines(self.count as u64);

        let mut out: Vec<Result<IterEntry>> = Vec::new();
        self.for_each(direction, mint, maxt, &mut |t, line, symbols| {
            stats.add_head_chunk_bytes(line.len() as u64);
            let structured = self.resolve(symbols);
            if let Some((line, labels)) = pipeline.process(t, line, &structured) {
                stats.add_post_filter_lines(1);
                let structured = if options.keep_structured_labels {
                    structured
                } else {
                    Labels::new()
                };
                out.push(Ok(IterEntry {
                    t,
                    line,
                    labels,
                    structured,
                    stream_hash: pipeline.base_hash(),
                }));
            }
        });

        Box::new(out.into_iter())
    }

    pub fn sample_iterator(
        &self,
        stats: &StatsContext,
        mint: i64,
        maxt: i64,
        extractor: &Arc<dyn SampleExtractor>,
    ) -> SampleStream {
        if self.is_empty() || maxt < self.mint || self.maxt < mint {
            return crate::iter::empty();
        }

        stats.add_head_chunk_lines(self.count as u64);

        let mut out: Vec<Result<IterSample>> = Vec::new();
        self.for_each(Direction::Forward, mint, maxt, &mut |t, line, symbols| {
            stats.add_head_chunk_bytes(line.len() as u64);
            let structured = self.resolve(symbols);
            if let Some((value, labels)) = extractor.process(t, line, &structured) {
                stats.add_post_filter_lines(1);
                out.push(Ok(IterSample {
                    t,
                    value,
                    hash: xxh64(line, 0),
                    labels,
                    stream_hash: extractor.base_hash(),
                }));
            }
        });

        Box::new(out.into_iter())
    }
}

/// Encode one entry's symbols section: `uvarint(section_len) uvarint(count)
/// [uvarint(name) uvarint(value)]*`, where `section_len` covers everything
/// after itself.
fn encode_symbols_section(buf: &mut BytesMut, symbols: &[Symbol]) {
    let mut section_len = uvarint_len(symbols.len() as u64);
    for s in symbols {
        section_len += uvarint_len(s.name as u64) + uvarint_len(s.value as u64);
    }

    encode_uvarint(buf, section_len as u64);
    encode_uvarint(buf, symbols.len() as u64);
    for s in symbols {
        encode_uvarint(buf, s.name as u64);
        encode_uvarint(buf, s.value as u64);
    }
}

fn decode_symbols_section(cursor: &mut &[u8]) -> Result<Vec<Symbol>> {
    let _section_len = decode_uvarint(cursor)?;
    let count = decode_uvarint(cursor)? as usize;
    let mut symbols = Vec::with_capacity(count);
    for _ in 0..count {
        let name = decode_uvarint(cursor)? as u32;
        let value = decode_uvarint(cursor)? as u32;
        symbols.push(Symbol { name, value });
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::FORMAT_V3;
    use crate::pipeline::NoopPipeline;
    use crate::stats::ChunkStats;
    use loghouse_core::Label;

    fn unordered() -> UnorderedHead {
        UnorderedHead::new(HeadBlockFmt::Unordered, Arc::new(Symbolizer::new()))
    }

    fn with_labels() -> UnorderedHead {
        UnorderedHead::new(
            HeadBlockFmt::UnorderedWithStructuredLabels,
            Arc::new(Symbolizer::new()),
        )
    }

    fn pipeline() -> Arc<dyn Pipeline> {
        Arc::new(NoopPipeline)
    }

    fn collect_ts(head: &UnorderedHead, direction: Direction) -> Vec<i64> {
        let stats = ChunkStats::new_context();
        head.iterator(&stats, direction, i64::MIN, i64::MAX, &pipeline(), IterOptions::default())
            .map(|r| r.unwrap().t)
            .collect()
    }

    #[test]
    fn test_out_of_order_appends_iterate_sorted() {
        let mut head = unordered();
        for (t, line) in [(5, "a"), (3, "b"), (8, "c"), (1, "d"), (9, "e"), (2, "f")] {
            head.append(t, Bytes::from(line), &Labels::new()).unwrap();
        }

        assert_eq!(collect_ts(&head, Direction::Forward), vec![1, 2, 3, 5, 8, 9]);
        assert_eq!(collect_ts(&head, Direction::Backward), vec![9, 8, 5, 3, 2, 1]);
        assert_eq!(head.bounds(), (1, 9));
    }

    #[test]
    fn test_same_timestamp_keeps_append_order() {
        let mut head = unordered();
        head.append(5, Bytes::from("first"), &Labels::new()).unwrap();
        head.append(5, Bytes::from("second"), &Labels::new()).unwrap();

        let stats = ChunkStats::new_context();
        let fwd: Vec<Bytes> = head
            .iterator(&stats, Direction::Forward, i64::MIN, i64::MAX, &pipeline(), IterOptions::default())
            .map(|r| r.unwrap().line)
            .collect();
        assert_eq!(fwd, vec![Bytes::from("first"), Bytes::from("second")]);

        let bwd: Vec<Bytes> = head
            .iterator(&stats, Direction::Backward, i64::MIN, i64::MAX, &pipeline(), IterOptions::default())
            .map(|r| r.unwrap().line)
            .collect();
        assert_eq!(bwd, vec![Bytes::from("second"), Bytes::from("first")]);
    }

    #[test]
    fn test_serialise_is_time_sorted() {
        let mut head = unordered();
        head.append(9, Bytes::from("late"), &Labels::new()).unwrap();
        head.append(2, Bytes::from("early"), &Labels::new()).unwrap();

        let payload = head.serialise(Codec::None, FORMAT_V3).unwrap();
        let mut cursor = payload.as_slice();
        assert_eq!(decode_varint(&mut cursor).unwrap(), 2);
        let len = decode_uvarint(&mut cursor).unwrap() as usize;
        assert_eq!(&cursor[..len], b"early");
    }

    #[test]
    fn test_labels_interned_and_resolved() {
        let head_sym = Arc::new(Symbolizer::new());
        let mut head = UnorderedHead::new(
            HeadBlockFmt::UnorderedWithStructuredLabels,
            Arc::clone(&head_sym),
        );
        let labels = vec![Label::new("app", "api"), Label::new("pod", "p-1")];
        head.append(1, Bytes::from("x"), &labels).unwrap();

        let stats = ChunkStats::new_context();
        let out: Vec<IterEntry> = head
            .iterator(
                &stats,
                Direction::Forward,
                i64::MIN,
                i64::MAX,
                &pipeline(),
                IterOptions {
                    keep_structured_labels: true,
                },
            )
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(out[0].structured, labels);
    }

    #[test]
    fn test_plain_unordered_drops_labels() {
        let mut head = unordered();
        head.append(1, Bytes::from("x"), &vec![Label::new("a", "b")])
            .unwrap();
        assert!(head.symbolizer.is_empty());
    }

    #[test]
    fn test_size_counts_lines_not_labels() {
        let mut head = with_labels();
        head.append(1, Bytes::from("12345"), &vec![Label::new("long-name", "long-value")])
            .unwrap();
        assert_eq!(head.uncompressed_size(), 5);
    }

    #[test]
    fn test_checkpoint_roundtrip_plain() {
        let mut head = unordered();
        for (t, line) in [(5, "a"), (3, "b"), (5, "c")] {
            head.append(t, Bytes::from(line), &Labels::new()).unwrap();
        }

        let mut buf = Vec::new();
        head.checkpoint_to(&mut buf).unwrap();
        assert!(buf.len() <= head.checkpoint_size());
        assert_eq!(buf[0], HeadBlockFmt::Unordered.byte());

        let mut cursor = &buf[1..];
        let loaded =
            UnorderedHead::load(&mut cursor, HeadBlockFmt::Unordered, Arc::new(Symbolizer::new()))
                .unwrap();
        assert_eq!(loaded.entries(), 3);
        assert_eq!(loaded.bounds(), (3, 5));
        assert_eq!(collect_ts(&loaded, Direction::Forward), vec![3, 5, 5]);
    }

    #[test]
    fn test_checkpoint_roundtrip_with_labels() {
        let sym = Arc::new(Symbolizer::new());
        let mut head =
            UnorderedHead::new(HeadBlockFmt::UnorderedWithStructuredLabels, Arc::clone(&sym));
        let labels = vec![Label::new("trace", "t1")];
        head.append(7, Bytes::from("line"), &labels).unwrap();

        let mut buf = Vec::new();
        head.checkpoint_to(&mut buf).unwrap();

        // The same symbolizer is restored separately by the chunk checkpoint.
        let mut cursor = &buf[1..];
        let loaded = UnorderedHead::load(
            &mut cursor,
            HeadBlockFmt::UnorderedWithStructuredLabels,
            Arc::clone(&sym),
        )
        .unwrap();

        let stats = ChunkStats::new_context();
        let out: Vec<IterEntry> = loaded
            .iterator(
                &stats,
                Direction::Forward,
                i64::MIN,
                i64::MAX,
                &pipeline(),
                IterOptions {
                    keep_structured_labels: true,
                },
            )
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(out[0].structured, labels);
    }

    #[test]
    fn test_symbols_section_length_covers_count_and_pairs() {
        let mut buf = BytesMut::new();
        encode_symbols_section(
            &mut buf,
            &[Symbol { name: 1, value: 2 }, Symbol { name: 3, value: 300 }],
        );

        let mut cursor = &buf[..];
        let section_len = decode_uvarint(&mut cursor).unwrap() as usize;
        assert_eq!(section_len, cursor.len());

        let symbols = {
            let mut full = &buf[..];
            decode_symbols_section(&mut full).unwrap()
        };
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[1], Symbol { name: 3, value: 300 });
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut head = with_labels();
        head.append(5, Bytes::from("x"), &vec![Label::new("a", "1")])
            .unwrap();
        head.reset();
        assert!(head.is_empty());
        assert_eq!(head.uncompressed_size(), 0);
        assert_eq!(head.bounds(), (0, 0));
    }
}
