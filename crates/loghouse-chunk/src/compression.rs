//! Compression Codecs
//!
//! This module enumerates the compression codecs a chunk may be written with
//! and adapts each one to a common writer/reader pair over raw byte streams.
//!
//! ## Codec Identity
//! The codec is part of the wire format: chunk format v2+ stores one codec
//! byte at offset 5 and readers must reject bytes they do not know. The
//! numbering is therefore frozen:
//!
//! | byte | codec | notes |
//! |------|-------|-------|
//! | 0 | none | payload stored raw |
//! | 1 | gzip | the only codec chunk format v1 can hold |
//! | 2 | dumb-snappy | legacy raw-block snappy, kept for old chunks |
//! | 3-5, 9 | lz4-256k / lz4-1M / lz4-4M / lz4-64k | historical block-size hints; all share the lz4 frame format |
//! | 6 | snappy | snappy frame format |
//! | 7 | zstd | |
//! | 8 | flate | raw deflate, no gzip envelope |
//!
//! ## Writer/Reader Adapters
//! `CodecWriter` implements `io::Write` and accumulates compressed bytes
//! until `finish()`; `CodecReader` implements `io::Read` over a compressed
//! payload. The streaming block iterator reads entries incrementally through
//! `CodecReader` without materializing the whole uncompressed block.

use std::fmt;
use std::io::{self, Read, Write};

use bytes::{Buf, Bytes};
use loghouse_core::{Error, Result};

/// Compression codec for chunk blocks and the v4 symbol table section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Codec {
    None = 0,
    Gzip = 1,
    DumbSnappy = 2,
    Lz4_256k = 3,
    Lz4_1M = 4,
    Lz4_4M = 5,
    Snappy = 6,
    Zstd = 7,
    Flate = 8,
    Lz4_64k = 9,
}

impl Codec {
    /// All known codecs, in wire-byte order.
    pub fn all() -> [Codec; 10] {
        [
            Codec::None,
            Codec::Gzip,
            Codec::DumbSnappy,
            Codec::Lz4_256k,
            Codec::Lz4_1M,
            Codec::Lz4_4M,
            Codec::Snappy,
            Codec::Zstd,
            Codec::Flate,
            Codec::Lz4_64k,
        ]
    }

    /// Start a compressing writer; call `finish()` to obtain the payload.
    pub fn writer(&self) -> Result<CodecWriter> {
        let w = match self {
            Codec::None => CodecWriter::Plain(Vec::new()),
            Codec::Gzip => CodecWriter::Gzip(flate2::write::GzEncoder::new(
                Vec::new(),
                flate2::Compression::default(),
            )),
            Codec::Flate => CodecWriter::Flate(flate2::write::DeflateEncoder::new(
                Vec::new(),
                flate2::Compression::default(),
            )),
            Codec::DumbSnappy => CodecWriter::DumbSnappy(Vec::new()),
            Codec::Snappy => CodecWriter::Snappy(snap::write::FrameEncoder::new(Vec::new())),
            Codec::Lz4_64k | Codec::Lz4_256k | Codec::Lz4_1M | Codec::Lz4_4M => {
                CodecWriter::Lz4(lz4_flex::frame::FrameEncoder::new(Vec::new()))
            }
            Codec::Zstd => CodecWriter::Zstd(
                zstd::stream::write::Encoder::new(Vec::new(), zstd::DEFAULT_COMPRESSION_LEVEL)
                    .map_err(|e| Error::Compression(e.to_string()))?,
            ),
        };
        Ok(w)
    }

    /// Open a decompressing reader over a compressed payload.
    pub fn reader(&self, payload: Bytes) -> Result<CodecReader> {
        let r = match self {
            Codec::None => CodecReader::Plain(payload.reader()),
            Codec::Gzip => CodecReader::Gzip(flate2::read::GzDecoder::new(payload.reader())),
            Codec::Flate => CodecReader::Flate(flate2::read::DeflateDecoder::new(payload.reader())),
            Codec::DumbSnappy => {
                let raw = snap::raw::Decoder::new()
                    .decompress_vec(&payload)
                    .map_err(|e| Error::Decompression(e.to_string()))?;
                CodecReader::DumbSnappy(io::Cursor::new(raw))
            }
            Codec::Snappy => CodecReader::Snappy(snap::read::FrameDecoder::new(payload.reader())),
            Codec::Lz4_64k | Codec::Lz4_256k | Codec::Lz4_1M | Codec::Lz4_4M => {
                CodecReader::Lz4(lz4_flex::frame::FrameDecoder::new(payload.reader()))
            }
            Codec::Zstd => CodecReader::Zstd(
                zstd::stream::read::Decoder::with_buffer(payload.reader())
                    .map_err(|e| Error::Decompression(e.to_string()))?,
            ),
        };
        Ok(r)
    }

    /// One-shot compression of a complete buffer.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut w = self.writer()?;
        w.write_all(data).map_err(|e| Error::Compression(e.to_string()))?;
        w.finish()
    }

    /// One-shot decompression of a complete payload.
    pub fn decompress(&self, payload: Bytes) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.reader(payload)?
            .read_to_end(&mut out)
            .map_err(|e| Error::Decompression(e.to_string()))?;
        Ok(out)
    }
}

impl TryFrom<u8> for Codec {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Codec::None),
            1 => Ok(Codec::Gzip),
            2 => Ok(Codec::DumbSnappy),
            3 => Ok(Codec::Lz4_256k),
            4 => Ok(Codec::Lz4_1M),
            5 => Ok(Codec::Lz4_4M),
            6 => Ok(Codec::Snappy),
            7 => Ok(Codec::Zstd),
            8 => Ok(Codec::Flate),
            9 => Ok(Codec::Lz4_64k),
            _ => Err(Error::InvalidCodec(value)),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Codec::None => "none",
            Codec::Gzip => "gzip",
            Codec::DumbSnappy => "dumb-snappy",
            Codec::Lz4_256k => "lz4-256k",
            Codec::Lz4_1M => "lz4-1M",
            Codec::Lz4_4M => "lz4-4M",
            Codec::Snappy => "snappy",
            Codec::Zstd => "zstd",
            Codec::Flate => "flate",
            Codec::Lz4_64k => "lz4-64k",
        };
        f.write_str(name)
    }
}

type BytesReader = bytes::buf::Reader<Bytes>;

/// Compressing sink; collect the payload with `finish()`.
pub enum CodecWriter {
    Plain(Vec<u8>),
    Gzip(flate2::write::GzEncoder<Vec<u8>>),
    Flate(flate2::write::DeflateEncoder<Vec<u8>>),
    // Raw snappy has no streaming form; buffer and compress on finish.
    DumbSnappy(Vec<u8>),
    Snappy(snap::write::FrameEncoder<Vec<u8>>),
    Lz4(lz4_flex::frame::FrameEncoder<Vec<u8>>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

impl CodecWriter {
    /// Flush any trailing frames and return the compressed payload.
    pub fn finish(self) -> Result<Vec<u8>> {
        match self {
            CodecWriter::Plain(buf) => Ok(buf),
            CodecWriter::Gzip(enc) => enc.finish().map_err(|e| Error::Compression(e.to_string())),
            CodecWriter::Flate(enc) => enc.finish().map_err(|e| Error::Compression(e.to_string())),
            CodecWriter::DumbSnappy(buf) => snap::raw::Encoder::new()
                .compress_vec(&buf)
                .map_err(|e| Error::Compression(e.to_string())),
            CodecWriter::Snappy(enc) => enc
                .into_inner()
                .map_err(|e| Error::Compression(e.to_string())),
            CodecWriter::Lz4(enc) => enc.finish().map_err(|e| Error::Compression(e.to_string())),
            CodecWriter::Zstd(enc) => enc.finish().map_err(|e| Error::Compression(e.to_string())),
        }
    }
}

impl Write for CodecWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CodecWriter::Plain(w) | CodecWriter::DumbSnappy(w) => w.write(buf),
            CodecWriter::Gzip(w) => w.write(buf),
            CodecWriter::Flate(w) => w.write(buf),
            CodecWriter::Snappy(w) => w.write(buf),
            CodecWriter::Lz4(w) => w.write(buf),
            CodecWriter::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CodecWriter::Plain(_) | CodecWriter::DumbSnappy(_) => Ok(()),
            CodecWriter::Gzip(w) => w.flush(),
            CodecWriter::Flate(w) => w.flush(),
            CodecWriter::Snappy(w) => w.flush(),
            CodecWriter::Lz4(w) => w.flush(),
            CodecWriter::Zstd(w) => w.flush(),
        }
    }
}

/// Decompressing source over one block payload.
pub enum CodecReader {
    Plain(BytesReader),
    Gzip(flate2::read::GzDecoder<BytesReader>),
    Flate(flate2::read::DeflateDecoder<BytesReader>),
    DumbSnappy(io::Cursor<Vec<u8>>),
    Snappy(snap::read::FrameDecoder<BytesReader>),
    Lz4(lz4_flex::frame::FrameDecoder<BytesReader>),
    Zstd(zstd::stream::read::Decoder<'static, BytesReader>),
}

impl Read for CodecReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CodecReader::Plain(r) => r.read(buf),
            CodecReader::Gzip(r) => r.read(buf),
            CodecReader::Flate(r) => r.read(buf),
            CodecReader::DumbSnappy(r) => r.read(buf),
            CodecReader::Snappy(r) => r.read(buf),
            CodecReader::Lz4(r) => r.read(buf),
            CodecReader::Zstd(r) => r.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Wire byte mapping
    // ---------------------------------------------------------------

    #[test]
    fn test_codec_bytes_are_frozen() {
        assert_eq!(Codec::None as u8, 0);
        assert_eq!(Codec::Gzip as u8, 1);
        assert_eq!(Codec::DumbSnappy as u8, 2);
        assert_eq!(Codec::Lz4_256k as u8, 3);
        assert_eq!(Codec::Lz4_1M as u8, 4);
        assert_eq!(Codec::Lz4_4M as u8, 5);
        assert_eq!(Codec::Snappy as u8, 6);
        assert_eq!(Codec::Zstd as u8, 7);
        assert_eq!(Codec::Flate as u8, 8);
        assert_eq!(Codec::Lz4_64k as u8, 9);
    }

    #[test]
    fn test_try_from_roundtrip_all() {
        for codec in Codec::all() {
            assert_eq!(Codec::try_from(codec as u8).unwrap(), codec);
        }
    }

    #[test]
    fn test_try_from_unknown_byte() {
        for bad in [10u8, 42, u8::MAX] {
            assert!(matches!(
                Codec::try_from(bad),
                Err(Error::InvalidCodec(b)) if b == bad
            ));
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Codec::Gzip.to_string(), "gzip");
        assert_eq!(Codec::DumbSnappy.to_string(), "dumb-snappy");
        assert_eq!(Codec::Lz4_64k.to_string(), "lz4-64k");
        assert_eq!(Codec::Zstd.to_string(), "zstd");
    }

    // ---------------------------------------------------------------
    // Round trips
    // ---------------------------------------------------------------

    #[test]
    fn test_roundtrip_all_codecs() {
        let data: Vec<u8> = (0..10_000u32)
            .flat_map(|i| format!("line {} payload\n", i).into_bytes())
            .collect();

        for codec in Codec::all() {
            let compressed = codec.compress(&data).unwrap();
            let back = codec.decompress(Bytes::from(compressed)).unwrap();
            assert_eq!(back, data, "codec {}", codec);
        }
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        for codec in Codec::all() {
            let compressed = codec.compress(&[]).unwrap();
            let back = codec.decompress(Bytes::from(compressed)).unwrap();
            assert!(back.is_empty(), "codec {}", codec);
        }
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"not compressed at all".to_vec();
        assert_eq!(Codec::None.compress(&data).unwrap(), data);
    }

    #[test]
    fn test_compression_actually_shrinks() {
        let data = vec![b'x'; 64 * 1024];
        for codec in [Codec::Gzip, Codec::Snappy, Codec::Lz4_256k, Codec::Zstd, Codec::Flate] {
            let compressed = codec.compress(&data).unwrap();
            assert!(
                compressed.len() < data.len() / 4,
                "codec {} got {} bytes",
                codec,
                compressed.len()
            );
        }
    }

    #[test]
    fn test_incremental_reads_match_oneshot() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let compressed = Bytes::from(Codec::Gzip.compress(&data).unwrap());

        let mut reader = Codec::Gzip.reader(compressed).unwrap();
        let mut out = Vec::new();
        let mut small = [0u8; 17];
        loop {
            let n = reader.read(&mut small).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&small[..n]);
        }
        assert_eq!(out, data);
    }

    #[test]
    fn test_garbage_payload_fails() {
        let garbage = Bytes::from_static(b"\x00\x01\x02definitely not a frame");
        for codec in [Codec::Gzip, Codec::Snappy, Codec::Zstd, Codec::DumbSnappy] {
            let res = match codec.reader(garbage.clone()) {
                Ok(mut r) => {
                    let mut sink = Vec::new();
                    r.read_to_end(&mut sink).map(|_| ()).map_err(|_| ())
                }
                Err(_) => Err(()),
            };
            assert!(res.is_err(), "codec {} accepted garbage", codec);
        }
    }

    #[test]
    fn test_lz4_variants_share_frame_format() {
        let data = b"the four lz4 codecs differ only in their wire byte".to_vec();
        let compressed = Codec::Lz4_64k.compress(&data).unwrap();
        for codec in [Codec::Lz4_256k, Codec::Lz4_1M, Codec::Lz4_4M] {
            let back = codec.decompress(Bytes::from(compressed.clone())).unwrap();
            assert_eq!(back, data);
        }
    }
}
