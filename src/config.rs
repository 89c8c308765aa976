//! Pipeline configuration.
//!
//! One `PipelineConfig` describes a whole batch: where the graph files
//! live, where artifacts go, how many subsets to partition into, and the
//! kernel's refinement depth. The `plan` phase snapshots the effective
//! config next to the manifest so later phases and operators can see
//! exactly what the batch was built with.
//!
//! Output directory layout:
//!
//! ```text
//! <output_dir>/
//!   config.json        effective config, written at plan time
//!   manifest.json      frozen record list + digest
//!   blocks/
//!     block_0000_0001.kmb
//!     block_0000_0002.kmb
//!     ...
//!   kmatrix.kmf        final N x N matrix, written at merge time
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KmatrixError, Result};

pub const DEFAULT_PATTERN: &str = "*.json";
pub const DEFAULT_SUBSET_COUNT: usize = 10;
pub const DEFAULT_WL_ITERATIONS: usize = 5;

/// File holding the effective config inside the output directory.
pub const CONFIG_FILE: &str = "config.json";
/// File holding the batch manifest inside the output directory.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Subdirectory holding block artifacts.
pub const BLOCKS_DIR: &str = "blocks";
/// File holding the reconstructed global matrix.
pub const FINAL_MATRIX_FILE: &str = "kmatrix.kmf";

fn default_pattern() -> String {
    DEFAULT_PATTERN.to_string()
}

fn default_subset_count() -> usize {
    DEFAULT_SUBSET_COUNT
}

fn default_wl_iterations() -> usize {
    DEFAULT_WL_ITERATIONS
}

/// Settings shared by every phase of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Directory holding the graph input files.
    pub graphs_dir: PathBuf,
    /// Directory receiving manifest, blocks, and the final matrix.
    pub output_dir: PathBuf,
    /// Glob pattern selecting input files inside `graphs_dir`.
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Number of partition subsets (K).
    #[serde(default = "default_subset_count")]
    pub subset_count: usize,
    /// Refinement rounds for the Weisfeiler-Lehman kernel.
    #[serde(default = "default_wl_iterations")]
    pub wl_iterations: usize,
}

impl PipelineConfig {
    /// Config with default pattern, subset count, and kernel depth.
    pub fn new(graphs_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            graphs_dir: graphs_dir.into(),
            output_dir: output_dir.into(),
            pattern: default_pattern(),
            subset_count: default_subset_count(),
            wl_iterations: default_wl_iterations(),
        }
    }

    /// Read a config file. Returns None if `path` doesn't exist.
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(Some(config))
    }

    /// Write the config as pretty JSON to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check settings that are wrong regardless of the record set.
    ///
    /// `subset_count` must be at least 2: a single subset yields no
    /// subset pairs and therefore no blocks to merge.
    pub fn validate(&self) -> Result<()> {
        if self.subset_count < 2 {
            return Err(KmatrixError::Configuration(format!(
                "subset count must be at least 2, got {}",
                self.subset_count
            )));
        }
        if self.pattern.is_empty() {
            return Err(KmatrixError::Configuration(
                "glob pattern must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Create the output directory and block subdirectory.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.blocks_dir())?;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.output_dir.join(CONFIG_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILE)
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.output_dir.join(BLOCKS_DIR)
    }

    pub fn final_matrix_path(&self) -> PathBuf {
        self.output_dir.join(FINAL_MATRIX_FILE)
    }
}
