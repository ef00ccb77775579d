//! Symbol Table (Symbolizer)
//!
//! Structured labels repeat heavily across the entries of one stream: the
//! same `trace_id` name on every line, a handful of distinct values. The
//! symbolizer interns every label string once per chunk and hands out `u32`
//! indices; blocks and the head then store `(name_idx, value_idx)` pairs
//! instead of strings.
//!
//! ## Identity
//! Indices are assigned in insertion order and index 0 is reserved for the
//! empty string, so a freshly loaded table reproduces the exact indices the
//! writer handed out - references inside sealed blocks stay valid across a
//! serialize/deserialize round trip.
//!
//! ## Concurrency
//! The chunk's single writer interns through `add`; any number of block
//! iterators resolve through `lookup` concurrently. Readers only index below
//! the length they observe, so a writer appending never invalidates them.
//!
//! ## Serialization
//! `uvarint(count)` then `uvarint(len) bytes` per string, CRC32-framed by the
//! caller: compressed with the chunk codec inside the chunk wire form,
//! uncompressed when written into a checkpoint.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use loghouse_core::varint::{decode_uvarint, encode_uvarint, uvarint_len};
use loghouse_core::{Error, Label, Labels, Result};
use parking_lot::RwLock;

use crate::chunk::crc32;
use crate::compression::Codec;

/// One structured label as stored on disk: indices into the symbol table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Symbol {
    pub name: u32,
    pub value: u32,
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, u32>,
    symbols: Vec<String>,
    /// Sum of raw bytes of all interned strings.
    size: usize,
}

impl Inner {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.map.get(s) {
            return idx;
        }
        let idx = self.symbols.len() as u32;
        self.symbols.push(s.to_string());
        self.map.insert(s.to_string(), idx);
        self.size += s.len();
        idx
    }
}

/// Per-chunk interning table for structured-label strings.
pub struct Symbolizer {
    inner: RwLock<Inner>,
    compressed_size: AtomicUsize,
    decompressed_size: AtomicUsize,
}

impl Default for Symbolizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Symbolizer {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        // Reserved: index 0 resolves to the empty string.
        inner.symbols.push(String::new());
        inner.map.insert(String::new(), 0);
        Self {
            inner: RwLock::new(inner),
            compressed_size: AtomicUsize::new(0),
            decompressed_size: AtomicUsize::new(0),
        }
    }

    /// Intern a label set, returning one index pair per label.
    pub fn add(&self, labels: &Labels) -> Vec<Symbol> {
        if labels.is_empty() {
            return Vec::new();
        }
        let mut inner = self.inner.write();
        labels
            .iter()
            .map(|l| Symbol {
                name: inner.intern(&l.name),
                value: inner.intern(&l.value),
            })
            .collect()
    }

    /// Resolve index pairs back into labels.
    ///
    /// Unknown indices resolve to the empty string; a corrupted reference
    /// must not take down the whole block.
    pub fn lookup(&self, symbols: &[Symbol]) -> Labels {
        if symbols.is_empty() {
            return Labels::new();
        }
        let inner = self.inner.read();
        let resolve = |idx: u32| -> String {
            inner
                .symbols
                .get(idx as usize)
                .cloned()
                .unwrap_or_default()
        };
        symbols
            .iter()
            .map(|s| Label::new(resolve(s.name), resolve(s.value)))
            .collect()
    }

    /// Number of interned strings, including the reserved empty string.
    pub fn len(&self) -> usize {
        self.inner.read().symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Sum of the raw bytes of every interned string.
    pub fn uncompressed_size(&self) -> usize {
        self.inner.read().size
    }

    /// Size of the compressed on-wire section, when known.
    pub fn compressed_size(&self) -> usize {
        self.compressed_size.load(Ordering::Relaxed)
    }

    /// Byte length of the uncompressed serialized section.
    pub fn decompressed_size(&self) -> usize {
        let known = self.decompressed_size.load(Ordering::Relaxed);
        if known > 0 {
            return known;
        }
        self.serialized_len()
    }

    /// Exact byte length of the checkpoint (uncompressed) serialization.
    pub fn checkpoint_size(&self) -> usize {
        self.serialized_len()
    }

    fn serialized_len(&self) -> usize {
        let inner = self.inner.read();
        let mut size = uvarint_len(inner.symbols.len() as u64);
        for s in &inner.symbols {
            size += uvarint_len(s.len() as u64) + s.len();
        }
        size
    }

    fn serialize_raw(&self) -> BytesMut {
        let inner = self.inner.read();
        let mut buf = BytesMut::with_capacity(inner.size + inner.symbols.len() * 2 + 4);
        encode_uvarint(&mut buf, inner.symbols.len() as u64);
        for s in &inner.symbols {
            encode_uvarint(&mut buf, s.len() as u64);
            buf.put_slice(s.as_bytes());
        }
        buf
    }

    /// Write the compressed wire section; returns bytes written and the CRC
    /// (big-endian) the caller appends after the section.
    pub fn serialize_to(&self, w: &mut dyn Write, codec: Codec) -> Result<(usize, [u8; 4])> {
        let raw = self.serialize_raw();
        self.decompressed_size.store(raw.len(), Ordering::Relaxed);

        let compressed = codec.compress(&raw)?;
        self.compressed_size.store(compressed.len(), Ordering::Relaxed);

        w.write_all(&compressed)?;
        Ok((compressed.len(), crc32(&compressed).to_be_bytes()))
    }

    /// Write the uncompressed checkpoint section; same framing contract as
    /// `serialize_to`.
    pub fn checkpoint_to(&self, w: &mut dyn Write) -> Result<(usize, [u8; 4])> {
        let raw = self.serialize_raw();
        self.decompressed_size.store(raw.len(), Ordering::Relaxed);
        w.write_all(&raw)?;
        Ok((raw.len(), crc32(&raw).to_be_bytes()))
    }

    /// Rebuild a table from the compressed wire section.
    pub fn from_wire(section: Bytes, codec: Codec) -> Result<Self> {
        let compressed_len = section.len();
        let raw = codec.decompress(section)?;
        let s = Self::parse(&raw)?;
        s.compressed_size.store(compressed_len, Ordering::Relaxed);
        s.decompressed_size.store(raw.len(), Ordering::Relaxed);
        Ok(s)
    }

    /// Rebuild a table from an uncompressed checkpoint section.
    pub fn from_checkpoint(section: &[u8]) -> Result<Self> {
        let s = Self::parse(section)?;
        s.decompressed_size.store(section.len(), Ordering::Relaxed);
        Ok(s)
    }

    fn parse(mut raw: &[u8]) -> Result<Self> {
        let mut inner = Inner::default();
        let count = decode_uvarint(&mut raw)?;
        for _ in 0..count {
            let len = decode_uvarint(&mut raw)? as usize;
            if raw.len() < len {
                return Err(Error::InvalidData("truncated symbol table".to_string()));
            }
            let s = std::str::from_utf8(&raw[..len])
                .map_err(|_| Error::InvalidData("symbol is not valid utf-8".to_string()))?
                .to_string();
            raw = &raw[len..];

            let idx = inner.symbols.len() as u32;
            inner.size += s.len();
            inner.map.insert(s.clone(), idx);
            inner.symbols.push(s);
        }
        if inner.symbols.is_empty() {
            // Tolerate an empty section; keep the reserved slot invariant.
            inner.symbols.push(String::new());
            inner.map.insert(String::new(), 0);
        }
        Ok(Self {
            inner: RwLock::new(inner),
            compressed_size: AtomicUsize::new(0),
            decompressed_size: AtomicUsize::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(n, v)| Label::new(*n, *v)).collect()
    }

    // ---------------------------------------------------------------
    // Interning
    // ---------------------------------------------------------------

    #[test]
    fn test_add_assigns_insertion_order() {
        let s = Symbolizer::new();
        let syms = s.add(&labels(&[("a", "1"), ("b", "2")]));
        assert_eq!(syms, vec![Symbol { name: 1, value: 2 }, Symbol { name: 3, value: 4 }]);
    }

    #[test]
    fn test_add_deduplicates() {
        let s = Symbolizer::new();
        let first = s.add(&labels(&[("a", "1")]));
        let second = s.add(&labels(&[("a", "1")]));
        assert_eq!(first, second);
        // "", "a", "1"
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_name_and_value_share_namespace() {
        let s = Symbolizer::new();
        let syms = s.add(&labels(&[("x", "x")]));
        assert_eq!(syms[0].name, syms[0].value);
    }

    #[test]
    fn test_lookup_roundtrip() {
        let s = Symbolizer::new();
        let set = labels(&[("app", "loghouse"), ("env", "prod")]);
        let syms = s.add(&set);
        assert_eq!(s.lookup(&syms), set);
    }

    #[test]
    fn test_lookup_unknown_index_is_empty() {
        let s = Symbolizer::new();
        let out = s.lookup(&[Symbol { name: 99, value: 0 }]);
        assert_eq!(out[0].name, "");
        assert_eq!(out[0].value, "");
    }

    #[test]
    fn test_empty_label_set() {
        let s = Symbolizer::new();
        assert!(s.add(&Labels::new()).is_empty());
        assert!(s.lookup(&[]).is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn test_uncompressed_size_counts_distinct_strings_once() {
        let s = Symbolizer::new();
        s.add(&labels(&[("aa", "bb")]));
        s.add(&labels(&[("aa", "cc")]));
        // "aa" + "bb" + "cc"
        assert_eq!(s.uncompressed_size(), 6);
    }

    // ---------------------------------------------------------------
    // Serialization round trips
    // ---------------------------------------------------------------

    #[test]
    fn test_wire_roundtrip_preserves_indices() {
        let s = Symbolizer::new();
        let syms = s.add(&labels(&[("a", "1"), ("b", "2"), ("a", "3")]));

        let mut out = Vec::new();
        let (n, _crc) = s.serialize_to(&mut out, Codec::Gzip).unwrap();
        assert_eq!(n, out.len());
        assert_eq!(s.compressed_size(), out.len());

        let loaded = Symbolizer::from_wire(Bytes::from(out), Codec::Gzip).unwrap();
        assert_eq!(loaded.len(), s.len());
        assert_eq!(loaded.lookup(&syms), s.lookup(&syms));
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let s = Symbolizer::new();
        let syms = s.add(&labels(&[("trace", "abc"), ("span", "def")]));

        let mut out = Vec::new();
        let (n, _crc) = s.checkpoint_to(&mut out).unwrap();
        assert_eq!(n, out.len());
        assert_eq!(n, s.checkpoint_size());

        let loaded = Symbolizer::from_checkpoint(&out).unwrap();
        assert_eq!(loaded.lookup(&syms), s.lookup(&syms));
    }

    #[test]
    fn test_loaded_table_keeps_interning() {
        let s = Symbolizer::new();
        s.add(&labels(&[("a", "1")]));

        let mut out = Vec::new();
        s.checkpoint_to(&mut out).unwrap();
        let loaded = Symbolizer::from_checkpoint(&out).unwrap();

        // Re-adding an existing pair must reuse the serialized indices.
        let syms = loaded.add(&labels(&[("a", "1")]));
        assert_eq!(syms, vec![Symbol { name: 1, value: 2 }]);
        // And a new string extends the table.
        let more = loaded.add(&labels(&[("b", "1")]));
        assert_eq!(more[0].name, 3);
        assert_eq!(more[0].value, 2);
    }

    #[test]
    fn test_from_checkpoint_truncated_fails() {
        let s = Symbolizer::new();
        s.add(&labels(&[("somewhat-long-name", "v")]));
        let mut out = Vec::new();
        s.checkpoint_to(&mut out).unwrap();
        assert!(Symbolizer::from_checkpoint(&out[..out.len() - 3]).is_err());
    }

    #[test]
    fn test_concurrent_lookups() {
        use std::sync::Arc;

        let s = Arc::new(Symbolizer::new());
        let set = labels(&[("k", "v")]);
        let syms = s.add(&set);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&s);
                let syms = syms.clone();
                let set = set.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        assert_eq!(s.lookup(&syms), set);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
