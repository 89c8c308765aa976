//! Balanced contiguous partitioning of the global record order.
//!
//! Splits N records into K contiguous subsets whose sizes differ by at
//! most one: the first `N mod K` subsets hold `ceil(N/K)` records, the
//! rest `floor(N/K)`. Subsets are index cuts over the global order, so
//! the mapping between a global index and a `(subset, local)` pair is
//! pure arithmetic over the cumulative subset starts.
//!
//! The partition is never persisted. Every phase recomputes it from
//! `(record count, subset count)` alone, which is what keeps
//! independently-run compute and merge processes in agreement about
//! which record lives where.

use std::ops::Range;

use crate::error::{KmatrixError, Result};

/// Balanced contiguous split of `0..record_count` into K subsets,
/// with both directions of the global / (subset, local) index map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    sizes: Vec<usize>,
    /// `starts[k]` is the global index of subset k's first record.
    starts: Vec<usize>,
}

impl Partition {
    /// Split `record_count` records into `subset_count` contiguous subsets.
    ///
    /// Fails with a configuration error when `subset_count` is zero or
    /// exceeds `record_count` (which also rejects an empty record set).
    pub fn split(record_count: usize, subset_count: usize) -> Result<Self> {
        if subset_count == 0 || subset_count > record_count {
            return Err(KmatrixError::Configuration(format!(
                "subset count must be in 1..={}, got {}",
                record_count, subset_count
            )));
        }

        let base = record_count / subset_count;
        let extra = record_count % subset_count;

        let mut sizes = Vec::with_capacity(subset_count);
        let mut starts = Vec::with_capacity(subset_count);
        let mut start = 0;
        for k in 0..subset_count {
            let size = if k < extra { base + 1 } else { base };
            sizes.push(size);
            starts.push(start);
            start += size;
        }

        Ok(Self { sizes, starts })
    }

    /// Total number of records across all subsets.
    pub fn record_count(&self) -> usize {
        self.sizes.iter().sum()
    }

    /// Number of subsets.
    pub fn subset_count(&self) -> usize {
        self.sizes.len()
    }

    /// Size of subset `k`.
    ///
    /// # Panics
    ///
    /// Panics if `k` is out of range.
    pub fn size(&self, k: usize) -> usize {
        self.sizes[k]
    }

    /// Global index range `[start, start + size)` covered by subset `k`.
    ///
    /// # Panics
    ///
    /// Panics if `k` is out of range.
    pub fn subset_range(&self, k: usize) -> Range<usize> {
        self.starts[k]..self.starts[k] + self.sizes[k]
    }

    /// Map a global index to its `(subset, local)` coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `global` is out of range.
    pub fn locate(&self, global: usize) -> (usize, usize) {
        assert!(
            global < self.record_count(),
            "global index {} out of range (record count {})",
            global,
            self.record_count()
        );
        // First subset whose start exceeds `global`, minus one, owns it.
        let k = self.starts.partition_point(|&s| s <= global) - 1;
        (k, global - self.starts[k])
    }

    /// Map `(subset, local)` coordinates back to the global index.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates fall outside the partition.
    pub fn global_index(&self, subset: usize, local: usize) -> usize {
        assert!(
            local < self.sizes[subset],
            "local index {} out of range for subset {} (size {})",
            local,
            subset,
            self.sizes[subset]
        );
        self.starts[subset] + local
    }
}

/// All unordered subset pairs `(i, j)` with `i < j`, in lexicographic
/// order. This is the complete set of blocks for a batch: within-subset
/// similarities are recovered from these at merge time, so no `(k, k)`
/// pair is ever scheduled.
pub fn subset_pairs(subset_count: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..subset_count).flat_map(move |i| (i + 1..subset_count).map(move |j| (i, j)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split_ten_into_three() {
        let p = Partition::split(10, 3).unwrap();
        assert_eq!(p.subset_count(), 3);
        assert_eq!(p.size(0), 4);
        assert_eq!(p.size(1), 3);
        assert_eq!(p.size(2), 3);
        assert_eq!(p.subset_range(0), 0..4);
        assert_eq!(p.subset_range(1), 4..7);
        assert_eq!(p.subset_range(2), 7..10);
    }

    #[test]
    fn test_split_even() {
        let p = Partition::split(12, 4).unwrap();
        assert_eq!(p.subset_count(), 4);
        for k in 0..4 {
            assert_eq!(p.size(k), 3);
        }
    }

    #[test]
    fn test_single_subset() {
        let p = Partition::split(7, 1).unwrap();
        assert_eq!(p.subset_count(), 1);
        assert_eq!(p.size(0), 7);
        assert_eq!(p.locate(6), (0, 6));
    }

    #[test]
    fn test_one_record_per_subset() {
        let p = Partition::split(5, 5).unwrap();
        for k in 0..5 {
            assert_eq!(p.size(k), 1);
            assert_eq!(p.locate(k), (k, 0));
        }
    }

    #[test]
    fn test_zero_subsets_rejected() {
        let err = Partition::split(10, 0).unwrap_err();
        assert!(matches!(err, KmatrixError::Configuration(_)));
    }

    #[test]
    fn test_more_subsets_than_records_rejected() {
        let err = Partition::split(3, 4).unwrap_err();
        assert!(matches!(err, KmatrixError::Configuration(_)));
    }

    #[test]
    fn test_empty_record_set_rejected() {
        let err = Partition::split(0, 1).unwrap_err();
        assert!(matches!(err, KmatrixError::Configuration(_)));
    }

    #[test]
    fn test_locate_boundaries() {
        let p = Partition::split(10, 3).unwrap();
        // Subset boundaries: [0,4), [4,7), [7,10)
        assert_eq!(p.locate(0), (0, 0));
        assert_eq!(p.locate(3), (0, 3));
        assert_eq!(p.locate(4), (1, 0));
        assert_eq!(p.locate(6), (1, 2));
        assert_eq!(p.locate(7), (2, 0));
        assert_eq!(p.locate(9), (2, 2));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_locate_past_end_panics() {
        let p = Partition::split(10, 3).unwrap();
        p.locate(10);
    }

    #[test]
    fn test_subset_pairs_order() {
        let pairs: Vec<_> = subset_pairs(4).collect();
        assert_eq!(
            pairs,
            vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]
        );
    }

    #[test]
    fn test_subset_pairs_counts() {
        assert_eq!(subset_pairs(1).count(), 0);
        assert_eq!(subset_pairs(2).count(), 1);
        assert_eq!(subset_pairs(10).count(), 45);
    }

    proptest! {
        #[test]
        fn prop_sizes_sum_and_balance(n in 1usize..500, k in 1usize..40) {
            prop_assume!(k <= n);
            let p = Partition::split(n, k).unwrap();

            prop_assert_eq!(p.record_count(), n);
            let min = (0..k).map(|s| p.size(s)).min().unwrap();
            let max = (0..k).map(|s| p.size(s)).max().unwrap();
            prop_assert!(max - min <= 1, "sizes must differ by at most 1");
        }

        #[test]
        fn prop_index_map_is_bijection(n in 1usize..500, k in 1usize..40) {
            prop_assume!(k <= n);
            let p = Partition::split(n, k).unwrap();

            for global in 0..n {
                let (subset, local) = p.locate(global);
                prop_assert!(subset < k);
                prop_assert!(local < p.size(subset));
                prop_assert_eq!(p.global_index(subset, local), global);
            }
        }

        #[test]
        fn prop_subsets_are_contiguous(n in 1usize..500, k in 1usize..40) {
            prop_assume!(k <= n);
            let p = Partition::split(n, k).unwrap();

            let mut next = 0;
            for s in 0..k {
                let range = p.subset_range(s);
                prop_assert_eq!(range.start, next);
                next = range.end;
            }
            prop_assert_eq!(next, n);
        }
    }
}
