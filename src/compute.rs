//! Block computation: one kernel call per subset pair.
//!
//! Walks all unordered pairs `(i, j)` with `i < j` in lexicographic
//! order, loads the two subsets, and hands their concatenation (all of
//! `i`, then all of `j`) to the kernel in a single call. The resulting
//! matrix is stored keyed by the pair. Pairs whose artifact already
//! exists are skipped unless `force` is set, which is the only
//! checkpointing mechanism: a block is all-or-nothing, and an
//! interrupted run is simply re-run.
//!
//! The outer subset `i` is loaded once and reused for every `j > i`;
//! the inner subset is re-loaded per pair. A subset whose loaded record
//! count falls short of the manifest (a file changed or vanished after
//! planning) fails its pending pairs rather than shifting indices.

use std::time::Instant;

use crate::error::{KmatrixError, Result};
use crate::graph::{load_graphs, GraphRecord};
use crate::kernel::GraphKernel;
use crate::manifest::Manifest;
use crate::partition::Partition;
use crate::store::{BlockHeader, BlockStore};

/// Outcome of one compute run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeReport {
    /// Pairs computed and stored by this run.
    pub computed: usize,
    /// Pairs left alone because their artifact already existed.
    pub skipped: usize,
    /// Pairs that failed and have no artifact, in walk order.
    pub failed: Vec<(usize, usize)>,
}

impl ComputeReport {
    /// True when every subset pair has an artifact after this run.
    pub fn complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Computes and persists all block matrices for one batch.
pub struct BlockComputer<'a> {
    manifest: &'a Manifest,
    kernel: &'a dyn GraphKernel,
    store: &'a dyn BlockStore,
    digest: u128,
}

impl<'a> BlockComputer<'a> {
    pub fn new(
        manifest: &'a Manifest,
        kernel: &'a dyn GraphKernel,
        store: &'a dyn BlockStore,
    ) -> Self {
        let digest = manifest.digest_prefix();
        Self {
            manifest,
            kernel,
            store,
            digest,
        }
    }

    /// Compute every absent block; with `force`, recompute all of them.
    ///
    /// Per-block failures are recorded in the report, never propagated:
    /// the run always visits every pair, maximizing partial progress.
    pub fn run(&self, force: bool) -> Result<ComputeReport> {
        let partition = self.manifest.partition()?;
        let subsets = partition.subset_count();
        let pairs = subsets * (subsets - 1) / 2;

        tracing::info!(
            records = self.manifest.record_count(),
            subsets,
            pairs,
            force,
            "computing blocks"
        );

        let mut report = ComputeReport {
            computed: 0,
            skipped: 0,
            failed: Vec::new(),
        };

        for i in 0..subsets {
            let pending =
                force || ((i + 1)..subsets).any(|j| !self.store.exists(i, j));
            if !pending {
                report.skipped += subsets - i - 1;
                tracing::info!(subset = i, "all blocks present, skipping subset");
                continue;
            }

            let left = load_graphs(
                &self.manifest.graphs_dir,
                self.manifest.subset_paths(&partition, i),
            );
            let left_complete = left.len() == partition.size(i);
            if !left_complete {
                tracing::warn!(
                    subset = i,
                    expected = partition.size(i),
                    loaded = left.len(),
                    "subset shortfall, failing its pending blocks"
                );
            }

            for j in (i + 1)..subsets {
                if !force && self.store.exists(i, j) {
                    tracing::info!(i, j, "block exists, skipping");
                    report.skipped += 1;
                    continue;
                }
                if !left_complete {
                    report.failed.push((i, j));
                    continue;
                }
                match self.compute_block(i, j, &left, &partition) {
                    Ok(()) => report.computed += 1,
                    Err(e) => {
                        tracing::warn!(i, j, error = %e, "block failed");
                        report.failed.push((i, j));
                    }
                }
            }
        }

        tracing::info!(
            computed = report.computed,
            skipped = report.skipped,
            failed = report.failed.len(),
            "block computation finished"
        );
        Ok(report)
    }

    fn compute_block(
        &self,
        i: usize,
        j: usize,
        left: &[GraphRecord],
        partition: &Partition,
    ) -> Result<()> {
        let started = Instant::now();

        let right = load_graphs(
            &self.manifest.graphs_dir,
            self.manifest.subset_paths(partition, j),
        );
        if right.len() != partition.size(j) {
            return Err(KmatrixError::SimilarityComputation(format!(
                "subset {} loaded {} of {} records",
                j,
                right.len(),
                partition.size(j)
            )));
        }

        let mut records = Vec::with_capacity(left.len() + right.len());
        records.extend_from_slice(left);
        records.extend(right);

        let matrix = self.kernel.compute(&records)?;
        let dim = records.len();
        if matrix.dim() != (dim, dim) {
            return Err(KmatrixError::SimilarityComputation(format!(
                "kernel returned shape {:?} for {} records",
                matrix.dim(),
                dim
            )));
        }

        let header =
            BlockHeader::new(i, j, partition.size(i), partition.size(j), self.digest);
        self.store.put(&header, &matrix)?;

        tracing::info!(
            i,
            j,
            dim,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "computed block"
        );
        Ok(())
    }
}
