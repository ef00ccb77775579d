//! Pipeline and Sample-Extractor Contracts
//!
//! The chunk does not understand queries. Callers hand every iterator an
//! opaque per-entry processor and the chunk feeds it
//! `(timestamp, line, structured-labels)` triples:
//!
//! - A [`Pipeline`] may rewrite the line, derive labels, or reject the entry
//!   outright (rejected entries are dropped from the output but still counted
//!   in decode statistics).
//! - A [`SampleExtractor`] turns matching entries into `f64` samples instead.
//!
//! Both expose a `base_hash` identifying the stream the processor was built
//! for; merge iterators use it as a tie-breaker when interleaving entries
//! with equal timestamps.
//!
//! Processors are shared across the per-block iterators of one query, so
//! implementations needing state should use interior mutability.

use bytes::Bytes;
use loghouse_core::Labels;
use xxhash_rust::xxh64::xxh64;

/// Per-entry log processor supplied by the query engine.
pub trait Pipeline {
    /// Hash of the stream labels this pipeline was built for.
    fn base_hash(&self) -> u64 {
        0
    }

    /// Process one entry. `None` rejects it; `Some` carries the possibly
    /// rewritten line and the labels the processing derived.
    fn process(&self, t: i64, line: &[u8], structured: &Labels) -> Option<(Bytes, Labels)>;
}

/// Per-entry sample extractor supplied by the query engine.
pub trait SampleExtractor {
    fn base_hash(&self) -> u64 {
        0
    }

    /// Extract a sample value from one entry, or `None` to reject it.
    fn process(&self, t: i64, line: &[u8], structured: &Labels) -> Option<(f64, Labels)>;
}

/// Hash a label set the way pipelines derive their `base_hash`.
pub fn labels_hash(labels: &Labels) -> u64 {
    let mut buf = Vec::with_capacity(labels.iter().map(|l| l.name.len() + l.value.len() + 2).sum());
    for l in labels {
        buf.extend_from_slice(l.name.as_bytes());
        buf.push(b'=');
        buf.extend_from_slice(l.value.as_bytes());
        buf.push(b',');
    }
    xxh64(&buf, 0)
}

/// Pipeline that passes every entry through byte-identical.
///
/// Used by rebound so entries survive the rebuild untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPipeline;

impl Pipeline for NoopPipeline {
    fn process(&self, _t: i64, line: &[u8], _structured: &Labels) -> Option<(Bytes, Labels)> {
        Some((Bytes::copy_from_slice(line), Labels::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loghouse_core::Label;

    #[test]
    fn test_noop_passes_line_through() {
        let p = NoopPipeline;
        let (line, labels) = p.process(1, b"unchanged", &Labels::new()).unwrap();
        assert_eq!(line, Bytes::from_static(b"unchanged"));
        assert!(labels.is_empty());
    }

    #[test]
    fn test_noop_base_hash_is_stable() {
        assert_eq!(NoopPipeline.base_hash(), NoopPipeline.base_hash());
    }

    #[test]
    fn test_labels_hash_distinguishes_sets() {
        let a = vec![Label::new("app", "a")];
        let b = vec![Label::new("app", "b")];
        assert_ne!(labels_hash(&a), labels_hash(&b));
        assert_eq!(labels_hash(&a), labels_hash(&a.clone()));
    }
}
