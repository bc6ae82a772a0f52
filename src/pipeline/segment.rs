//! Partitioning of a raw frame into per-worker conversion segments

use super::convert::MACROPIXEL_BYTES;
use super::frame::BYTES_PER_PIXEL;

/// Contiguous slice of raw bytes `[start, end)` converting to pixels starting at `dest`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub dest: usize,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Number of pixels this segment produces
    pub fn pixels(&self) -> usize {
        self.len() / MACROPIXEL_BYTES * 2
    }

    /// Destination byte range inside a BGRA frame
    pub fn dest_bytes(&self) -> std::ops::Range<usize> {
        let start = self.dest * BYTES_PER_PIXEL;
        start..start + self.pixels() * BYTES_PER_PIXEL
    }
}

/// Split `byte_count` raw bytes into exactly `parts` segments.
///
/// Every segment is macropixel aligned. All but the last have the same size;
/// the last absorbs the remainder, truncated to whole macropixels. Segments
/// cover `[0, usable)` with no gap or overlap, where `usable` is `byte_count`
/// rounded down to a multiple of four.
pub fn partition(byte_count: usize, parts: usize) -> Vec<Segment> {
    assert!(parts > 0, "at least one segment is required");

    let usable = byte_count - byte_count % MACROPIXEL_BYTES;
    let part_size = usable / parts / MACROPIXEL_BYTES * MACROPIXEL_BYTES;

    (0..parts)
        .map(|i| {
            let start = i * part_size;
            let end = if i + 1 == parts {
                usable
            } else {
                start + part_size
            };
            Segment {
                start,
                end,
                dest: start / MACROPIXEL_BYTES * 2,
            }
        })
        .collect()
}
