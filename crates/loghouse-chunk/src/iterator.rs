//! Streaming Block Decode
//!
//! Reading a sealed block means pulling entries out of a compressed stream
//! without materializing the whole uncompressed payload:
//!
//! 1. A pooled decompressor wraps the block's compressed bytes
//! 2. A fixed 20-byte read buffer (two maximal varints) is topped up from the
//!    decompressor and the `timestamp` / `line-length` varints are parsed
//!    incrementally: a short read just loops; "invalid data" is only raised
//!    when EOF leaves unparseable bytes and the previous attempt made no
//!    progress
//! 3. Line lengths of 1 GiB or more are rejected before allocation
//! 4. The line lands in a size-classed pooled buffer
//! 5. For chunk format v4, the symbols section (length, count, then
//!    `(name_idx, value_idx)` uvarint pairs) is decoded into a pooled buffer
//!    and resolved through the chunk's symbol table
//!
//! Pooled buffers are returned in `Drop`, the single release point for every
//! exit path. Statistics accrue on the caller's context: compressed bytes at
//! construction, decompressed bytes/lines and structured-label bytes per
//! entry.

use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use loghouse_core::varint::{try_decode_uvarint, try_decode_varint, MAX_VARINT_LEN};
use loghouse_core::{Error, Labels, Result};
use xxhash_rust::xxh64::xxh64;

use crate::chunk::{FORMAT_V4, MAX_LINE_LENGTH};
use crate::compression::{Codec, CodecReader};
use crate::iter::{self, EntryStream, IterEntry, IterOptions, IterSample, SampleStream};
use crate::pipeline::{Pipeline, SampleExtractor};
use crate::pool;
use crate::stats::StatsContext;
use crate::symbolizer::{Symbol, Symbolizer};

/// Room for two maximal varints.
const READ_BUF_LEN: usize = 2 * MAX_VARINT_LEN;

/// Incremental decoder over one sealed block's compressed payload.
struct BufferedIterator {
    stats: StatsContext,
    payload: Bytes,
    codec: Codec,
    reader: Option<CodecReader>,
    format: u8,
    symbolizer: Arc<Symbolizer>,

    err: Option<Error>,
    closed: bool,

    read_buf: [u8; READ_BUF_LEN],
    read_buf_valid: usize,

    line_buf: Vec<u8>,
    line_len: usize,
    symbols_buf: Vec<Symbol>,
    curr_ts: i64,
}

impl BufferedIterator {
    fn new(
        stats: StatsContext,
        codec: Codec,
        payload: Bytes,
        format: u8,
        symbolizer: Arc<Symbolizer>,
    ) -> Self {
        stats.add_compressed_bytes(payload.len() as u64);
        Self {
            stats,
            payload,
            codec,
            reader: None,
            format,
            symbolizer,
            err: None,
            closed: false,
            read_buf: [0; READ_BUF_LEN],
            read_buf_valid: 0,
            line_buf: Vec::new(),
            line_len: 0,
            symbols_buf: Vec::new(),
            curr_ts: 0,
        }
    }

    fn next(&mut self) -> bool {
        if self.closed {
            return false;
        }

        if self.reader.is_none() {
            // Initialize the decompressor lazily so construction stays cheap
            // for blocks the merge never reaches.
            match self.codec.reader(self.payload.clone()) {
                Ok(r) => self.reader = Some(r),
                Err(e) => {
                    self.err = Some(e);
                    self.closed = true;
                    return false;
                }
            }
        }

        match self.move_next() {
            Ok(true) => true,
            Ok(false) => {
                self.closed = true;
                false
            }
            Err(e) => {
                self.err = Some(e);
                self.closed = true;
                false
            }
        }
    }

    fn line(&self) -> &[u8] {
        &self.line_buf[..self.line_len]
    }

    fn symbols(&self) -> &[Symbol] {
        &self.symbols_buf
    }

    fn take_err(&mut self) -> Option<Error> {
        self.err.take()
    }

    /// Top up the fixed read buffer; `Ok(0)` signals EOF (or a full buffer).
    fn fill_read_buf(&mut self) -> Result<usize> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Ok(0),
        };
        let n = reader.read(&mut self.read_buf[self.read_buf_valid..])?;
        self.read_buf_valid += n;
        Ok(n)
    }

    /// Drop `n` consumed bytes from the front of the read buffer.
    fn consume(&mut self, n: usize) {
        self.read_buf.copy_within(n..self.read_buf_valid, 0);
        self.read_buf_valid -= n;
    }

    /// Read until two adjacent varints parse from the buffered bytes.
    ///
    /// Returns the two values and their combined width, which the caller
    /// consumes. `None` means a clean EOF with nothing buffered. Raises
    /// "invalid data" only when an EOF read leaves the same unparseable
    /// bytes as the previous attempt.
    fn fill_two_varints(&mut self, first_signed: bool) -> Result<Option<(i64, u64, usize)>> {
        let mut last_attempt = 0usize;
        loop {
            let n = self.fill_read_buf()?;
            if n == 0 {
                if self.read_buf_valid == 0 {
                    return Ok(None);
                }
                if self.read_buf_valid == last_attempt {
                    return Err(Error::InvalidData("invalid data in chunk".to_string()));
                }
            }

            let buf = &self.read_buf[..self.read_buf_valid];
            let first = if first_signed {
                try_decode_varint(buf)
            } else {
                try_decode_uvarint(buf).map(|(v, w)| (v as i64, w))
            };
            if let Some((a, w)) = first {
                if let Some((b, w2)) = try_decode_uvarint(&buf[w..]) {
                    return Ok(Some((a, b, w + w2)));
                }
            }
            last_attempt = self.read_buf_valid;
        }
    }

    fn read_line_bytes(&mut self, mut filled: usize, line_size: usize) -> Result<()> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Err(Error::InvalidData("block reader closed".to_string())),
        };
        while filled < line_size {
            let n = reader.read(&mut self.line_buf[filled..line_size])?;
            if n == 0 {
                return Err(Error::InvalidData(
                    "unexpected end of block while reading line".to_string(),
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Decode the next entry into `curr_ts` / `line_buf` / `symbols_buf`.
    fn move_next(&mut self) -> Result<bool> {
        let (ts, line_size, width) = match self.fill_two_varints(true)? {
            Some(x) => x,
            None => return Ok(false),
        };
        let line_size = line_size as usize;

        let mut decompressed_bytes = (2 * MAX_VARINT_LEN) as u64;

        if line_size >= MAX_LINE_LENGTH {
            return Err(Error::LineTooLong {
                size: line_size,
                limit: MAX_LINE_LENGTH,
            });
        }

        if self.line_buf.capacity() < line_size {
            let old = std::mem::take(&mut self.line_buf);
            if old.capacity() > 0 {
                pool::lines().put(old);
            }
            self.line_buf = pool::lines().get(line_size);
        }
        self.line_buf.clear();
        self.line_buf.resize(line_size, 0);

        // Take whatever the read buffer already holds past the two varints,
        // then shift the rest down.
        let avail = self.read_buf_valid - width;
        let n_copy = avail.min(line_size);
        self.line_buf[..n_copy].copy_from_slice(&self.read_buf[width..width + n_copy]);
        self.consume(width + n_copy);

        self.read_line_bytes(n_copy, line_size)?;
        self.curr_ts = ts;
        self.line_len = line_size;

        decompressed_bytes += line_size as u64;

        if self.format < FORMAT_V4 {
            self.stats.add_decompressed_bytes(decompressed_bytes);
            self.stats.add_decompressed_lines(1);
            self.symbols_buf.clear();
            return Ok(true);
        }

        // Symbols section: length, count, then the index pairs. The length
        // is redundant for this decode-everything path and is discarded.
        let (_section_len, n_symbols, width) = match self.fill_two_varints(false)? {
            Some(x) => x,
            None => return Ok(false),
        };
        let n_symbols = n_symbols as usize;
        self.consume(width);

        let structured_bytes =
            MAX_VARINT_LEN as u64 + (n_symbols as u64) * (2 * MAX_VARINT_LEN) as u64;

        if self.symbols_buf.capacity() < n_symbols {
            let old = std::mem::take(&mut self.symbols_buf);
            if old.capacity() > 0 {
                pool::symbols().put(old);
            }
            self.symbols_buf = pool::symbols().get(n_symbols);
        }
        self.symbols_buf.clear();

        for _ in 0..n_symbols {
            let (name, value, width) = match self.fill_two_varints(false)? {
                Some(x) => x,
                None => return Ok(false),
            };
            self.consume(width);
            self.symbols_buf.push(Symbol {
                name: name as u32,
                value: value as u32,
            });
        }

        self.stats.add_decompressed_lines(1);
        self.stats.add_decompressed_structured_bytes(structured_bytes);
        self.stats
            .add_decompressed_bytes(decompressed_bytes + structured_bytes);
        Ok(true)
    }
}

impl Drop for BufferedIterator {
    fn drop(&mut self) {
        let line_buf = std::mem::take(&mut self.line_buf);
        if line_buf.capacity() > 0 {
            pool::lines().put(line_buf);
        }
        let symbols_buf = std::mem::take(&mut self.symbols_buf);
        if symbols_buf.capacity() > 0 {
            pool::symbols().put(symbols_buf);
        }
        self.reader = None;
    }
}

struct EntryBlockIterator {
    inner: BufferedIterator,
    pipeline: Arc<dyn Pipeline>,
    options: IterOptions,
}

impl Iterator for EntryBlockIterator {
    type Item = Result<IterEntry>;

    fn next(&mut self) -> Option<Result<IterEntry>> {
        loop {
            if !self.inner.next() {
                return self.inner.take_err().map(Err);
            }

            let structured = if self.inner.format >= FORMAT_V4 {
                self.inner.symbolizer.lookup(self.inner.symbols())
            } else {
                Labels::new()
            };

            match self
                .pipeline
                .process(self.inner.curr_ts, self.inner.line(), &structured)
            {
                None => continue,
                Some((line, labels)) => {
                    self.inner.stats.add_post_filter_lines(1);
                    let structured = if self.options.keep_structured_labels {
                        structured
                    } else {
                        Labels::new()
                    };
                    return Some(Ok(IterEntry {
                        t: self.inner.curr_ts,
                        line,
                        labels,
                        structured,
                        stream_hash: self.pipeline.base_hash(),
                    }));
                }
            }
        }
    }
}

struct SampleBlockIterator {
    inner: BufferedIterator,
    extractor: Arc<dyn SampleExtractor>,
}

impl Iterator for SampleBlockIterator {
    type Item = Result<IterSample>;

    fn next(&mut self) -> Option<Result<IterSample>> {
        loop {
            if !self.inner.next() {
                return self.inner.take_err().map(Err);
            }

            let structured = if self.inner.format >= FORMAT_V4 {
                self.inner.symbolizer.lookup(self.inner.symbols())
            } else {
                Labels::new()
            };

            match self
                .extractor
                .process(self.inner.curr_ts, self.inner.line(), &structured)
            {
                None => continue,
                Some((value, labels)) => {
                    self.inner.stats.add_post_filter_lines(1);
                    return Some(Ok(IterSample {
                        t: self.inner.curr_ts,
                        value,
                        hash: xxh64(self.inner.line(), 0),
                        labels,
                        stream_hash: self.extractor.base_hash(),
                    }));
                }
            }
        }
    }
}

/// Entry iterator over one sealed block under a pipeline.
#[allow(clippy::too_many_arguments)]
pub(crate) fn new_entry_iterator(
    stats: StatsContext,
    codec: Codec,
    payload: Bytes,
    format: u8,
    symbolizer: Arc<Symbolizer>,
    pipeline: Arc<dyn Pipeline>,
    options: IterOptions,
) -> EntryStream {
    if payload.is_empty() {
        return iter::empty();
    }
    Box::new(EntryBlockIterator {
        inner: BufferedIterator::new(stats, codec, payload, format, symbolizer),
        pipeline,
        options,
    })
}

/// Sample iterator over one sealed block under an extractor.
pub(crate) fn new_sample_iterator(
    stats: StatsContext,
    codec: Codec,
    payload: Bytes,
    format: u8,
    symbolizer: Arc<Symbolizer>,
    extractor: Arc<dyn SampleExtractor>,
) -> SampleStream {
    if payload.is_empty() {
        return iter::empty();
    }
    Box::new(SampleBlockIterator {
        inner: BufferedIterator::new(stats, codec, payload, format, symbolizer),
        extractor,
    })
}
