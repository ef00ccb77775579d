//! Error Types for Loghouse
//!
//! This module defines all error types that can occur while encoding,
//! decoding or iterating log chunks.
//!
//! ## Error Categories
//!
//! ### Data Integrity Errors
//! - `InvalidMagic`: Chunk does not start with the expected magic number
//! - `InvalidChecksum`: Meta or symbol-table section failed its CRC check
//! - `InvalidData`: Malformed varints, truncated sections, impossible offsets
//!
//! ### Version/Compatibility Errors
//! - `InvalidVersion`: Unknown chunk format version byte
//! - `InvalidCodec`: Unknown compression codec byte
//! - `InvalidHeadFormat`: Unknown head-block format tag in a checkpoint
//!
//! ### Write-path Errors
//! - `OutOfOrder`: An ordered head block rejected a timestamp older than its max
//! - `LineTooLong`: A decoded line length crossed the 1 GiB cap
//! - `NoDataInRange`: A rebound over a time range matched zero entries
//!
//! ## Usage
//! All fallible functions return `Result<T>`, aliased to
//! `Result<T, Error>`, so `?` propagation works throughout.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic number {0:#x}")]
    InvalidMagic(u32),

    #[error("invalid chunk format version: {0}")]
    InvalidVersion(u8),

    #[error("invalid compression codec: {0}")]
    InvalidCodec(u8),

    #[error("invalid head block format: {0}")]
    InvalidHeadFormat(u8),

    #[error("invalid checksum")]
    InvalidChecksum,

    #[error("entry out of order")]
    OutOfOrder,

    #[error("line too long: {size}, maximum {limit}")]
    LineTooLong { size: usize, limit: usize },

    #[error("no data in requested time range")]
    NoDataInRange,

    #[error("invalid data in chunk: {0}")]
    InvalidData(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("decompression error: {0}")]
    Decompression(String),
}

pub type Result<T> = std::result::Result<T, Error>;
