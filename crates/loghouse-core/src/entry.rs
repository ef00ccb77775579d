//! Entry Data Structure
//!
//! This module defines the core `Entry` type - the fundamental unit of data in
//! a loghouse chunk.
//!
//! ## What is an Entry?
//! An entry is a single log line for one stream, equivalent to:
//! - One line shipped by a log agent
//! - One record of an append-only stream
//!
//! ## Structure
//! Each entry contains:
//! - **t**: Timestamp in nanoseconds since epoch (signed, so pre-1970 survives)
//! - **line**: The raw log line (arbitrary bytes)
//! - **structured**: Optional ordered `(name, value)` label pairs attached to
//!   this entry alone, not to the stream (empty below chunk format v4)
//!
//! ## Design Decisions
//! - Uses `bytes::Bytes` for the line so head blocks, iterators and rebound
//!   share one allocation when shuffling entries between chunks
//! - Labels are plain owned strings; the chunk's symbol table deduplicates
//!   them on disk, not in this type
//! - Implements `Serialize`/`Deserialize` for metadata and debug tooling

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single structured-metadata label attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An ordered set of structured-metadata labels.
pub type Labels = Vec<Label>;

/// Sum of the raw string bytes held by a label set.
///
/// This is the size the chunk's admission check charges for structured
/// labels; the on-disk size is smaller once the symbol table deduplicates.
pub fn labels_size(labels: &Labels) -> usize {
    labels.iter().map(|l| l.name.len() + l.value.len()).sum()
}

/// A single log entry in a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Timestamp in nanoseconds since epoch
    pub t: i64,

    /// The raw log line
    pub line: Bytes,

    /// Structured labels carried by this entry alone (may be empty)
    pub structured: Labels,
}

impl Entry {
    pub fn new(t: i64, line: impl Into<Bytes>, structured: Labels) -> Self {
        Self {
            t,
            line: line.into(),
            structured,
        }
    }

    /// An entry with no structured labels.
    pub fn from_line(t: i64, line: impl Into<Bytes>) -> Self {
        Self::new(t, line, Labels::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------

    #[test]
    fn test_new() {
        let e = Entry::new(
            1_700_000_000_000_000_000,
            "level=error msg=boom",
            vec![Label::new("trace_id", "abc123")],
        );
        assert_eq!(e.t, 1_700_000_000_000_000_000);
        assert_eq!(e.line, Bytes::from("level=error msg=boom"));
        assert_eq!(e.structured.len(), 1);
        assert_eq!(e.structured[0].name, "trace_id");
        assert_eq!(e.structured[0].value, "abc123");
    }

    #[test]
    fn test_from_line_has_no_labels() {
        let e = Entry::from_line(42, "hello");
        assert_eq!(e.t, 42);
        assert!(e.structured.is_empty());
    }

    #[test]
    fn test_negative_timestamp() {
        let e = Entry::from_line(-1, "before the epoch");
        assert_eq!(e.t, -1);
    }

    #[test]
    fn test_empty_line() {
        let e = Entry::from_line(1, "");
        assert!(e.line.is_empty());
    }

    #[test]
    fn test_binary_line_preserved() {
        let line = Bytes::from(vec![0u8, 1, 2, 127, 128, 255]);
        let e = Entry::new(0, line.clone(), Labels::new());
        assert_eq!(e.line, line);
    }

    // ---------------------------------------------------------------
    // labels_size
    // ---------------------------------------------------------------

    #[test]
    fn test_labels_size_empty() {
        assert_eq!(labels_size(&Labels::new()), 0);
    }

    #[test]
    fn test_labels_size_sums_names_and_values() {
        let labels = vec![Label::new("a", "1"), Label::new("bb", "22")];
        // 1 + 1 + 2 + 2
        assert_eq!(labels_size(&labels), 6);
    }

    // ---------------------------------------------------------------
    // Clone / PartialEq
    // ---------------------------------------------------------------

    #[test]
    fn test_clone_shares_line() {
        let e = Entry::from_line(7, Bytes::from(vec![9u8; 4096]));
        let cloned = e.clone();
        assert_eq!(e, cloned);
    }

    #[test]
    fn test_ne_different_timestamp() {
        let a = Entry::from_line(1, "x");
        let b = Entry::from_line(2, "x");
        assert_ne!(a, b);
    }

    #[test]
    fn test_ne_different_labels() {
        let a = Entry::new(1, "x", vec![Label::new("a", "1")]);
        let b = Entry::new(1, "x", vec![Label::new("a", "2")]);
        assert_ne!(a, b);
    }

    // ---------------------------------------------------------------
    // Serde round-trip (JSON)
    // ---------------------------------------------------------------

    #[test]
    fn test_serde_roundtrip() {
        let e = Entry::new(
            123,
            "payload",
            vec![Label::new("k", "v"), Label::new("k2", "v2")],
        );
        let json = serde_json::to_string(&e).expect("serialize");
        let back: Entry = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(e, back);
    }

    #[test]
    fn test_serde_roundtrip_binary_line() {
        let e = Entry::from_line(5, Bytes::from(vec![0u8, 255, 128]));
        let json = serde_json::to_string(&e).expect("serialize");
        let back: Entry = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(e, back);
    }
}
