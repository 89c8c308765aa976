//! Keyed block artifact storage.
//!
//! Blocks are addressed by their subset pair `(i, j)`, `i < j`. The
//! trait is the seam between block computation / reconstruction and the
//! storage backend; the directory backend is the default, one file per
//! pair with atomic publication (write temp, then rename), so a
//! concurrent or crashed writer never leaves a half-visible block.

pub mod format;

pub use format::{BlockHeader, FinalHeader};

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::error::{KmatrixError, Result};

/// Storage backend for block matrices, keyed by subset pair.
pub trait BlockStore: Send + Sync {
    /// Cheap existence check, used for skip-if-exists.
    fn exists(&self, i: usize, j: usize) -> bool;

    /// Persist a block atomically. Replaces any existing artifact for
    /// the pair.
    fn put(&self, header: &BlockHeader, matrix: &Array2<f64>) -> Result<()>;

    /// Load the block for `(i, j)`. Fails with `MissingBlock` when the
    /// pair has never been stored.
    fn get(&self, i: usize, j: usize) -> Result<(BlockHeader, Array2<f64>)>;

    /// Pairs currently present, sorted lexicographically.
    fn list(&self) -> Result<Vec<(usize, usize)>>;
}

/// One file per block inside a single directory:
/// `block_0000_0001.kmb`, `block_0000_0002.kmb`, ...
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    /// Open the store, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn block_path(&self, i: usize, j: usize) -> PathBuf {
        self.dir.join(format!("block_{:04}_{:04}.kmb", i, j))
    }
}

/// Parse `block_NNNN_MMMM.kmb` back into a pair. Foreign files yield None.
fn parse_block_name(name: &str) -> Option<(usize, usize)> {
    let stem = name.strip_prefix("block_")?.strip_suffix(".kmb")?;
    let (i, j) = stem.split_once('_')?;
    Some((i.parse().ok()?, j.parse().ok()?))
}

impl BlockStore for DirectoryStore {
    fn exists(&self, i: usize, j: usize) -> bool {
        self.block_path(i, j).is_file()
    }

    fn put(&self, header: &BlockHeader, matrix: &Array2<f64>) -> Result<()> {
        let (i, j) = header.pair();
        let path = self.block_path(i, j);
        let tmp = path.with_extension("kmb.tmp");

        let mut writer = BufWriter::new(File::create(&tmp)?);
        format::write_block(&mut writer, header, matrix)?;
        writer.flush()?;
        drop(writer);

        std::fs::rename(&tmp, &path)?;
        tracing::debug!(i, j, path = %path.display(), "stored block");
        Ok(())
    }

    fn get(&self, i: usize, j: usize) -> Result<(BlockHeader, Array2<f64>)> {
        let path = self.block_path(i, j);
        if !path.is_file() {
            return Err(KmatrixError::MissingBlock { i, j });
        }
        let (header, matrix) = format::read_block(&path)?;
        if header.pair() != (i, j) {
            return Err(KmatrixError::InvalidFormat(format!(
                "block file {} holds pair ({}, {}), expected ({}, {})",
                path.display(),
                header.pair_i,
                header.pair_j,
                i,
                j
            )));
        }
        Ok((header, matrix))
    }

    fn list(&self) -> Result<Vec<(usize, usize)>> {
        let mut pairs = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(pair) = parse_block_name(name) {
                    pairs.push(pair);
                }
            }
        }
        pairs.sort_unstable();
        Ok(pairs)
    }
}
