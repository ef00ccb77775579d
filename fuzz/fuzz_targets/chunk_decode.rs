#![no_main]

use std::sync::Arc;

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use loghouse_chunk::iter::IterOptions;
use loghouse_chunk::{Chunk, ChunkStats, Direction, NoopPipeline};

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes to the chunk decoder.
    // The decoder should handle all malformed inputs gracefully:
    // - Invalid magic numbers and format versions
    // - Unknown codec bytes
    // - Truncated trailers and out-of-bounds section offsets
    // - Bad CRC32 checksums (block, meta, symbol table)
    // - Corrupted compressed payloads
    // - Malformed varints in block meta and entry framing
    let bytes = Bytes::copy_from_slice(data);

    if let Ok(chunk) = Chunk::from_bytes(bytes, 256 * 1024, 0) {
        // If parsing succeeded, drive every surviving block through the
        // streaming decoder; decode errors must surface as stream items,
        // never panics.
        let _ = chunk.size();
        let _ = chunk.block_count();
        let (from, to) = chunk.bounds();
        let _ = chunk.utilization();

        let stats = ChunkStats::new_context();
        let it = chunk.iterator(
            &stats,
            from,
            to.saturating_add(1),
            Direction::Forward,
            Arc::new(NoopPipeline),
            IterOptions {
                keep_structured_labels: true,
            },
        );
        for item in it {
            if item.is_err() {
                break;
            }
        }

        let _ = chunk.rebound(from, to, None);
    }
});
