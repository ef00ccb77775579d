//! Ordered Head Block
//!
//! The append path the ingester uses when it can guarantee per-stream
//! ordering: a flat entry vector, an `OutOfOrder` rejection for anything
//! older than the current maximum, and serialization that is a single pass.
//!
//! Structured labels are dropped on append; only the unordered-with-labels
//! variant preserves them.

use std::io::Write;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use loghouse_core::varint::{
    decode_uvarint, decode_varint, encode_uvarint, encode_varint, MAX_VARINT_LEN,
};
use loghouse_core::{Error, Result};

use crate::chunk::FORMAT_V4;
use crate::compression::Codec;
use crate::head::HeadBlockFmt;
use crate::iter::{Direction, EntryStream, IterEntry, IterSample, SampleStream};
use crate::pipeline::{Pipeline, SampleExtractor};
use crate::stats::StatsContext;
use xxhash_rust::xxh64::xxh64;

/// Head block that only accepts monotonically non-decreasing timestamps.
#[derive(Clone, Default)]
pub struct OrderedHead {
    entries: Vec<(i64, Bytes)>,
    /// Raw line bytes held.
    size: usize,
    mint: i64,
    maxt: i64,
}

impl OrderedHead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn uncompressed_size(&self) -> usize {
        self.size
    }

    pub fn bounds(&self) -> (i64, i64) {
        (self.mint, self.maxt)
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = (i64, &Bytes)> {
        self.entries.iter().map(|(t, line)| (*t, line))
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.size = 0;
        self.mint = 0;
        self.maxt = 0;
    }

    pub fn append(&mut self, t: i64, line: Bytes) -> Result<()> {
        if !self.is_empty() && self.maxt > t {
            return Err(Error::OutOfOrder);
        }

        if self.mint == 0 || self.mint > t {
            self.mint = t;
        }
        self.maxt = t;
        self.size += line.len();
        self.entries.push((t, line));

        Ok(())
    }

    pub fn serialise(&self, codec: Codec, chunk_format: u8) -> Result<Vec<u8>> {
        let mut raw = BytesMut::with_capacity(self.size + self.entries.len() * 8);
        for (t, line) in &self.entries {
            encode_varint(&mut raw, *t);
            encode_uvarint(&mut raw, line.len() as u64);
            raw.put_slice(line);
            if chunk_format >= FORMAT_V4 {
                // Empty symbols section: one byte of section holding count 0.
                encode_uvarint(&mut raw, 1);
                encode_uvarint(&mut raw, 0);
            }
        }

        let mut w = codec.writer()?;
        w.write_all(&raw)
            .map_err(|e| Error::Compression(e.to_string()))?;
        w.finish()
    }

    pub fn checkpoint_to(&self, w: &mut dyn Write) -> Result<()> {
        let mut buf = BytesMut::with_capacity(self.checkpoint_size());

        buf.put_u8(HeadBlockFmt::Ordered.byte());
        encode_uvarint(&mut buf, self.entries.len() as u64);
        encode_uvarint(&mut buf, self.size as u64);
        encode_varint(&mut buf, self.mint);
        encode_varint(&mut buf, self.maxt);

        for (t, line) in &self.entries {
            encode_varint(&mut buf, *t);
            encode_uvarint(&mut buf, line.len() as u64);
            buf.put_slice(line);
        }

        w.write_all(&buf)?;
        Ok(())
    }

    pub fn checkpoint_size(&self) -> usize {
        let mut size = 1; // format tag
        size += MAX_VARINT_LEN * 2; // entry count + uncompressed size
        size += MAX_VARINT_LEN * 2; // mint, maxt
        size += MAX_VARINT_LEN * 2 * self.entries.len(); // ts + line length
        size + self.size
    }

    /// Parse checkpoint bytes positioned after the format tag.
    pub(super) fn load(cursor: &mut &[u8]) -> Result<OrderedHead> {
        let count = decode_uvarint(cursor)? as usize;
        let size = decode_uvarint(cursor)? as usize;
        let mint = decode_varint(cursor)?;
        let maxt = decode_varint(cursor)?;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let t = decode_varint(cursor)?;
            let len = decode_uvarint(cursor)? as usize;
            if cursor.len() < len {
                return Err(Error::InvalidData(
                    "truncated head checkpoint entry".to_string(),
                ));
            }
            entries.push((t, Bytes::copy_from_slice(&cursor[..len])));
            *cursor = &cursor[len..];
        }

        Ok(OrderedHead {
            entries,
            size,
            mint,
            maxt,
        })
    }

    pub fn iterator(
        &self,
        stats: &StatsContext,
        direction: Direction,
        mint: i64,
        maxt: i64,
        pipeline: &Arc<dyn Pipeline>,
    ) -> EntryStream {
        if self.is_empty() || maxt < self.mint || self.maxt < mint {
            return crate::iter::empty();
        }

        stats.add_head_chunk_lines(self.entries.len() as u64);

        let mut out: Vec<Result<IterEntry>> = Vec::new();
        let mut process = |t: i64, line: &Bytes| {
            if t < mint || t >= maxt {
                return;
            }
            stats.add_head_chunk_bytes(line.len() as u64);
            if let Some((line, labels)) = pipeline.process(t, line, &Vec::new()) {
                stats.add_post_filter_lines(1);
                out.push(Ok(IterEntry {
                    t,
                    line,
                    labels,
                    structured: Vec::new(),
                    stream_hash: pipeline.base_hash(),
                }));
            }
        };

        match direction {
            Direction::Forward => {
                for (t, line) in &self.entries {
                    process(*t, line);
                }
            }
            Direction::Backward => {
                for (t, line) in self.entries.iter().rev() {
                    process(*t, line);
                }
            }
        }

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

        stats.add_head_chunk_lines(self.entries.len() as u64);

        let mut out: Vec<Result<IterSample>> = Vec::new();
        for (t, line) in &self.entries {
            if *t < mint || *t >= maxt {
                continue;
            }
            stats.add_head_chunk_bytes(line.len() as u64);
            if let Some((value, labels)) = extractor.process(*t, line, &Vec::new()) {
                stats.add_post_filter_lines(1);
                out.push(Ok(IterSample {
                    t: *t,
                    value,
                    hash: xxh64(line, 0),
                    labels,
                    stream_hash: extractor.base_hash(),
                }));
            }
        }

        Box::new(out.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::FORMAT_V3;
    use crate::pipeline::NoopPipeline;
    use crate::stats::ChunkStats;

    fn pipeline() -> Arc<dyn Pipeline> {
        Arc::new(NoopPipeline)
    }

    #[test]
    fn test_append_tracks_bounds_and_size() {
        let mut head = OrderedHead::new();
        head.append(5, Bytes::from("abc")).unwrap();
        head.append(9, Bytes::from("de")).unwrap();
        assert_eq!(head.bounds(), (5, 9));
        assert_eq!(head.uncompressed_size(), 5);
        assert_eq!(head.entries(), 2);
    }

    #[test]
    fn test_append_equal_timestamp_allowed() {
        let mut head = OrderedHead::new();
        head.append(5, Bytes::from("a")).unwrap();
        head.append(5, Bytes::from("b")).unwrap();
        assert_eq!(head.entries(), 2);
    }

    #[test]
    fn test_append_out_of_order_rejected() {
        let mut head = OrderedHead::new();
        head.append(5, Bytes::from("a")).unwrap();
        let err = head.append(4, Bytes::from("b")).unwrap_err();
        assert!(matches!(err, Error::OutOfOrder));
        // State unchanged by the rejected append.
        assert_eq!(head.entries(), 1);
        assert_eq!(head.uncompressed_size(), 1);
    }

    #[test]
    fn test_reset() {
        let mut head = OrderedHead::new();
        head.append(5, Bytes::from("abc")).unwrap();
        head.reset();
        assert!(head.is_empty());
        assert_eq!(head.bounds(), (0, 0));
        assert_eq!(head.uncompressed_size(), 0);
    }

    #[test]
    fn test_serialise_roundtrips_through_codec() {
        let mut head = OrderedHead::new();
        head.append(1, Bytes::from("one")).unwrap();
        head.append(2, Bytes::from("two")).unwrap();

        let payload = head.serialise(Codec::Gzip, FORMAT_V3).unwrap();
        let raw = Codec::Gzip.decompress(Bytes::from(payload)).unwrap();

        let mut cursor = raw.as_slice();
        assert_eq!(decode_varint(&mut cursor).unwrap(), 1);
        assert_eq!(decode_uvarint(&mut cursor).unwrap(), 3);
        assert_eq!(&cursor[..3], b"one");
    }

    #[test]
    fn test_serialise_v4_appends_empty_symbol_sections() {
        let mut head = OrderedHead::new();
        head.append(1, Bytes::from("x")).unwrap();

        let payload = head.serialise(Codec::None, FORMAT_V4).unwrap();
        // varint(1) + uvarint(1) + 'x' + uvarint(1) + uvarint(0)
        assert_eq!(payload, vec![2, 1, b'x', 1, 0]);
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let mut head = OrderedHead::new();
        head.append(10, Bytes::from("alpha")).unwrap();
        head.append(20, Bytes::from("beta")).unwrap();

        let mut buf = Vec::new();
        head.checkpoint_to(&mut buf).unwrap();
        assert!(buf.len() <= head.checkpoint_size());
        assert_eq!(buf[0], HeadBlockFmt::Ordered.byte());

        let mut cursor = &buf[1..];
        let loaded = OrderedHead::load(&mut cursor).unwrap();
        assert_eq!(loaded.entries(), 2);
        assert_eq!(loaded.bounds(), (10, 20));
        assert_eq!(loaded.uncompressed_size(), head.uncompressed_size());
        assert_eq!(loaded.entries, head.entries);
    }

    #[test]
    fn test_load_truncated_fails() {
        let mut head = OrderedHead::new();
        head.append(10, Bytes::from("alpha")).unwrap();
        let mut buf = Vec::new();
        head.checkpoint_to(&mut buf).unwrap();

        let short = &buf[1..buf.len() - 2];
        let mut cursor = short;
        assert!(OrderedHead::load(&mut cursor).is_err());
    }

    #[test]
    fn test_iterator_forward_and_backward() {
        let stats = ChunkStats::new_context();
        let mut head = OrderedHead::new();
        for t in 1..=3 {
            head.append(t, Bytes::from(format!("e{}", t))).unwrap();
        }

        let fwd: Vec<i64> = head
            .iterator(&stats, Direction::Forward, 0, 10, &pipeline())
            .map(|r| r.unwrap().t)
            .collect();
        assert_eq!(fwd, vec![1, 2, 3]);

        let bwd: Vec<i64> = head
            .iterator(&stats, Direction::Backward, 0, 10, &pipeline())
            .map(|r| r.unwrap().t)
            .collect();
        assert_eq!(bwd, vec![3, 2, 1]);
    }

    #[test]
    fn test_iterator_applies_time_bounds_exclusive_end() {
        let stats = ChunkStats::new_context();
        let mut head = OrderedHead::new();
        for t in 1..=5 {
            head.append(t, Bytes::from("x")).unwrap();
        }

        let ts: Vec<i64> = head
            .iterator(&stats, Direction::Forward, 2, 4, &pipeline())
            .map(|r| r.unwrap().t)
            .collect();
        assert_eq!(ts, vec![2, 3]);
    }

    #[test]
    fn test_iterator_snapshot_unaffected_by_later_appends() {
        let stats = ChunkStats::new_context();
        let mut head = OrderedHead::new();
        head.append(1, Bytes::from("a")).unwrap();

        let it = head.iterator(&stats, Direction::Forward, 0, 10, &pipeline());
        head.append(2, Bytes::from("b")).unwrap();

        assert_eq!(it.count(), 1);
    }
}
