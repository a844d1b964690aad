use serde::{Deserialize, Serialize};

use crate::config::ChunkSizePolicy;

/// One contiguous byte range of the resource, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub id: u32,
    pub lo: u64,
    pub hi: u64,
}

impl ChunkRange {
    pub fn new(id: u32, lo: u64, hi: u64) -> Self {
        Self { id, lo, hi }
    }

    pub fn size(&self) -> u64 {
        if self.hi >= self.lo {
            self.hi - self.lo + 1
        } else {
            0
        }
    }
}

/// Tile `[0, size)` into contiguous inclusive ranges.
///
/// The chunk-size policy decides the nominal length; when it would produce
/// more ranges than `connections`, the plan collapses to one equally-sized
/// range per connection with the division remainder spread one byte at a
/// time over the leading ranges. A short tail is topped up from its left
/// neighbor so the last range is never smaller than half a chunk.
pub fn plan_chunks(size: u64, connections: u32, chunk_size: &ChunkSizePolicy) -> Vec<ChunkRange> {
    if size == 0 {
        return Vec::new();
    }

    let connections = u64::from(connections.max(1));
    let mut cs = chunk_size.resolve(size).max(1);
    let extra = if size / cs > connections {
        cs = (size / connections).max(1);
        size % connections
    } else {
        0
    };

    let n = if extra > 0 {
        size / cs
    } else {
        (size + cs - 1) / cs
    } as usize;
    if n == 0 {
        return Vec::new();
    }

    let mut lens = vec![cs; n];
    lens[n - 1] = size
        .saturating_sub((n as u64 - 1) * cs)
        .saturating_sub(extra);
    for len in lens.iter_mut().take(extra as usize) {
        *len += 1;
    }

    if n > 1 && lens[n - 1] < cs / 2 {
        let boost = cs / 2 - lens[n - 1];
        lens[n - 2] -= boost;
        lens[n - 1] += boost;
    }

    let mut ranges = Vec::with_capacity(n);
    let mut lo = 0u64;
    for (id, len) in lens.into_iter().enumerate() {
        let hi = lo + len - 1;
        ranges.push(ChunkRange::new(id as u32, lo, hi));
        lo = hi + 1;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(bytes: u64) -> ChunkSizePolicy {
        ChunkSizePolicy::Fixed(bytes)
    }

    fn assert_tiles(ranges: &[ChunkRange], size: u64) {
        assert_eq!(ranges[0].lo, 0);
        for pair in ranges.windows(2) {
            assert!(pair[0].lo < pair[1].lo);
            assert_eq!(pair[0].hi + 1, pair[1].lo);
        }
        assert_eq!(ranges.last().unwrap().hi, size - 1);
        assert_eq!(ranges.iter().map(ChunkRange::size).sum::<u64>(), size);
    }

    #[test]
    fn plan_with_tail_rebalance() {
        let ranges = plan_chunks(100_000, 5, &fixed(30_000));
        assert_eq!(
            ranges,
            vec![
                ChunkRange::new(0, 0, 29_999),
                ChunkRange::new(1, 30_000, 59_999),
                ChunkRange::new(2, 60_000, 84_999),
                ChunkRange::new(3, 85_000, 99_999),
            ]
        );
        assert_tiles(&ranges, 100_000);
    }

    #[test]
    fn plan_collapses_to_connection_count() {
        // 10 nominal chunks exceed 4 connections, so the plan becomes 4
        // equal ranges of 250 bytes.
        let ranges = plan_chunks(1000, 4, &fixed(100));
        assert_eq!(ranges.len(), 4);
        assert!(ranges.iter().all(|r| r.size() == 250));
        assert_tiles(&ranges, 1000);
    }

    #[test]
    fn plan_spreads_remainder_over_leading_chunks() {
        let ranges = plan_chunks(1003, 4, &fixed(100));
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].size(), 251);
        assert_eq!(ranges[1].size(), 251);
        assert_eq!(ranges[2].size(), 251);
        assert_eq!(ranges[3].size(), 250);
        assert_tiles(&ranges, 1003);
    }

    #[test]
    fn single_chunk_never_rebalances() {
        let ranges = plan_chunks(100, 1, &fixed(30_000));
        assert_eq!(ranges, vec![ChunkRange::new(0, 0, 99)]);
    }

    #[test]
    fn exact_division_keeps_nominal_size() {
        let ranges = plan_chunks(90_000, 5, &fixed(30_000));
        assert_eq!(ranges.len(), 3);
        assert!(ranges.iter().all(|r| r.size() == 30_000));
        assert_tiles(&ranges, 90_000);
    }

    #[test]
    fn computed_policy_is_resolved_against_size() {
        let policy = ChunkSizePolicy::Computed(std::sync::Arc::new(|size| size / 4));
        let ranges = plan_chunks(1000, 8, &policy);
        assert_eq!(ranges.len(), 4);
        assert_tiles(&ranges, 1000);
    }

    #[test]
    fn zero_size_yields_empty_plan() {
        assert!(plan_chunks(0, 5, &fixed(100)).is_empty());
    }
}
