//! Reconstruction of the global matrix from persisted blocks.
//!
//! Every unordered global pair `(a, b)` resolves to exactly one cell of
//! exactly one block:
//!
//! - Same subset `s`, not the last: block `(s, s+1)` holds subset `s`
//!   in its top-left quadrant, so the cell is `(la, lb)` directly.
//! - Same subset, the last one (`K-1`): only block `(0, K-1)` carries
//!   that subset's within-similarities, in its bottom-right quadrant,
//!   offset by the size of subset 0.
//! - Different subsets `si < sj`: block `(si, sj)`, with the column
//!   shifted past the first quadrant by `size(si)`.
//! - Different subsets `si > sj`: the mirrored cell of block
//!   `(sj, si)`, with the row shifted by `size(sj)`.
//!
//! The resolved value lands at both `(a, b)` and `(b, a)`; afterwards
//! the diagonal is set to the kernel's self-similarity. Blocks are
//! loaded and validated up front: an absent pair aborts the merge
//! before any cell is written, because a partially reconstructed
//! matrix must never be produced.
//!
//! Complexity: O(K^2) block reads plus O(N^2) cell resolutions, each
//! O(log K) for the subset lookup.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::Array2;

use crate::error::{KmatrixError, Result};
use crate::manifest::Manifest;
use crate::partition::{subset_pairs, Partition};
use crate::store::format::{self, FinalHeader};
use crate::store::{BlockHeader, BlockStore};

/// Rebuild the full N x N similarity matrix from stored blocks.
///
/// `self_similarity` fills the diagonal (1.0 for a normalized kernel).
pub fn reconstruct(
    manifest: &Manifest,
    store: &dyn BlockStore,
    self_similarity: f64,
) -> Result<Array2<f64>> {
    let partition = manifest.partition()?;
    let n = partition.record_count();
    let digest = manifest.digest_prefix();

    let mut blocks: HashMap<(usize, usize), Array2<f64>> = HashMap::new();
    for (i, j) in subset_pairs(partition.subset_count()) {
        let (header, matrix) = store.get(i, j)?;
        validate_block(&header, &partition, digest)?;
        blocks.insert((i, j), matrix);
    }
    tracing::info!(
        records = n,
        blocks = blocks.len(),
        "loaded all blocks, reconstructing"
    );

    let mut global = Array2::<f64>::zeros((n, n));
    for a in 0..n {
        for b in (a + 1)..n {
            let value = resolve(a, b, &partition, &blocks)?;
            global[[a, b]] = value;
            global[[b, a]] = value;
        }
    }
    for d in 0..n {
        global[[d, d]] = self_similarity;
    }
    Ok(global)
}

/// Check that a stored block belongs to this batch and partition.
fn validate_block(
    header: &BlockHeader,
    partition: &Partition,
    digest: u128,
) -> Result<()> {
    let (i, j) = header.pair();
    if header.manifest_digest != digest {
        return Err(KmatrixError::InvalidFormat(format!(
            "block ({}, {}) was computed under a different manifest",
            i, j
        )));
    }
    let expected = (partition.size(i) as u64, partition.size(j) as u64);
    if (header.left_len, header.right_len) != expected {
        return Err(KmatrixError::InvalidFormat(format!(
            "block ({}, {}) quadrants {}+{} do not match partition {}+{}",
            i, j, header.left_len, header.right_len, expected.0, expected.1
        )));
    }
    Ok(())
}

/// Locate the one block cell holding the similarity of global indices
/// `a` and `b` (`a != b`).
///
/// Fails with `MissingBlock` when the pair's block is not loaded. A
/// single-subset partition always fails here: it plans no pairs, so no
/// block exists to recover within-subset cells from.
fn resolve(
    a: usize,
    b: usize,
    partition: &Partition,
    blocks: &HashMap<(usize, usize), Array2<f64>>,
) -> Result<f64> {
    let (sa, la) = partition.locate(a);
    let (sb, lb) = partition.locate(b);
    let last = partition.subset_count() - 1;

    let (pair, row, col) = if sa == sb {
        if sa < last {
            // Top-left quadrant of the neighboring block holds the
            // subset's own similarities.
            ((sa, sa + 1), la, lb)
        } else {
            // The last subset only ever appears as the second quadrant
            // of block (0, K-1).
            let offset = partition.size(0);
            ((0, last), offset + la, offset + lb)
        }
    } else if sa < sb {
        ((sa, sb), la, partition.size(sa) + lb)
    } else {
        ((sb, sa), partition.size(sb) + la, lb)
    };

    let (i, j) = pair;
    let block = blocks
        .get(&pair)
        .ok_or(KmatrixError::MissingBlock { i, j })?;
    Ok(block[[row, col]])
}

/// Persist the reconstructed matrix atomically (temp file + rename).
pub fn write_global_matrix(
    path: &Path,
    manifest: &Manifest,
    matrix: &Array2<f64>,
) -> Result<()> {
    let header = FinalHeader::new(matrix.nrows(), manifest.digest_prefix());
    let tmp = path.with_extension("kmf.tmp");

    let mut writer = BufWriter::new(File::create(&tmp)?);
    format::write_final(&mut writer, &header, matrix)?;
    writer.flush()?;
    drop(writer);

    std::fs::rename(&tmp, path)?;
    tracing::info!(order = matrix.nrows(), path = %path.display(), "wrote global matrix");
    Ok(())
}
