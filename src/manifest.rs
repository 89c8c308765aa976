//! Batch manifest: the frozen record ordering every phase shares.
//!
//! `plan` discovers the input files once, drops records that cannot
//! feed the kernel (unparseable, zero nodes, zero edges), and snapshots
//! the survivors' sorted relative paths together with the subset count.
//! Compute and merge both derive their partition from this snapshot, so
//! no two processes can disagree about which global index a record owns.
//!
//! The digest is a blake3 hash over the subset count and the record
//! list. Its first 16 bytes are embedded in every block artifact, which
//! lets merge reject blocks computed under a different snapshot.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::{KmatrixError, Result};
use crate::graph::{discover, load_graphs, GraphRecord};
use crate::partition::Partition;

pub const MANIFEST_VERSION: u32 = 1;

/// Immutable snapshot of one batch's inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub version: u32,
    pub graphs_dir: PathBuf,
    pub pattern: String,
    pub subset_count: usize,
    /// Relative record paths, lexicographically sorted, degenerate
    /// records already excluded. Position in this list is the record's
    /// global index.
    pub records: Vec<PathBuf>,
    /// Hex blake3 digest over `(subset_count, records)`.
    pub digest: String,
}

impl Manifest {
    /// Discover, pre-filter, and snapshot the record set.
    ///
    /// Every discovered file is parsed once; files that fail to load
    /// are dropped with a warning before partitioning, so the manifest
    /// only lists records the kernel can consume.
    pub fn plan(config: &PipelineConfig) -> Result<Self> {
        let discovered = discover(&config.graphs_dir, &config.pattern)?;
        if discovered.is_empty() {
            return Err(KmatrixError::Configuration(format!(
                "no files matching '{}' under {}",
                config.pattern,
                config.graphs_dir.display()
            )));
        }

        let loaded = load_graphs(&config.graphs_dir, &discovered);
        let nodes: usize = loaded.iter().map(GraphRecord::node_count).sum();
        let edges: usize = loaded.iter().map(GraphRecord::edge_count).sum();
        let records: Vec<PathBuf> = loaded.into_iter().map(|record| record.path).collect();

        let dropped = discovered.len() - records.len();
        if dropped > 0 {
            tracing::warn!(
                discovered = discovered.len(),
                dropped,
                "excluded records that failed to load"
            );
        }
        tracing::info!(records = records.len(), nodes, edges, "snapshotted record set");

        Self::from_records(
            config.graphs_dir.clone(),
            config.pattern.clone(),
            config.subset_count,
            records,
        )
    }

    /// Build a manifest from an already-filtered record list.
    ///
    /// Fails here rather than at compute time if the subset count
    /// exceeds the usable record count.
    pub fn from_records(
        graphs_dir: PathBuf,
        pattern: String,
        subset_count: usize,
        records: Vec<PathBuf>,
    ) -> Result<Self> {
        Partition::split(records.len(), subset_count)?;
        let digest = compute_digest(subset_count, &records);
        Ok(Self {
            version: MANIFEST_VERSION,
            graphs_dir,
            pattern,
            subset_count,
            records,
            digest: digest.to_hex().to_string(),
        })
    }

    /// Read a manifest file. Returns None if `path` doesn't exist.
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&contents)?;
        manifest.validate()?;
        Ok(Some(manifest))
    }

    /// Write the manifest atomically (temp file + rename), so a crashed
    /// plan never leaves a half-written snapshot behind.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Check version and digest consistency.
    pub fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(KmatrixError::InvalidFormat(format!(
                "unsupported manifest version: {}",
                self.version
            )));
        }
        let expected = compute_digest(self.subset_count, &self.records);
        if self.digest != expected.to_hex().to_string() {
            return Err(KmatrixError::InvalidFormat(
                "manifest digest mismatch (file edited or corrupted)".to_string(),
            ));
        }
        Ok(())
    }

    /// Check an explicitly requested subset count against the planned
    /// one. Blocks on disk were cut under the manifest's partition;
    /// reading them under any other count would misplace every quadrant.
    pub fn require_subset_count(&self, requested: usize) -> Result<()> {
        if requested != self.subset_count {
            return Err(KmatrixError::Configuration(format!(
                "requested {} subsets but the manifest was planned with {}",
                requested, self.subset_count
            )));
        }
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Derive the partition all phases of this batch agree on.
    pub fn partition(&self) -> Result<Partition> {
        Partition::split(self.records.len(), self.subset_count)
    }

    /// Record paths owned by subset `k` under `partition`.
    pub fn subset_paths(&self, partition: &Partition, k: usize) -> &[PathBuf] {
        &self.records[partition.subset_range(k)]
    }

    /// First 16 digest bytes as a little-endian integer, the form
    /// embedded in block headers.
    pub fn digest_prefix(&self) -> u128 {
        let hash = compute_digest(self.subset_count, &self.records);
        u128::from_le_bytes(hash.as_bytes()[0..16].try_into().unwrap())
    }
}

fn compute_digest(subset_count: usize, records: &[PathBuf]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(subset_count as u64).to_le_bytes());
    hasher.update(&(records.len() as u64).to_le_bytes());
    for path in records {
        let s = path.to_string_lossy();
        hasher.update(&(s.len() as u64).to_le_bytes());
        hasher.update(s.as_bytes());
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const TRIANGLE: &str = r#"{
        "nodes": [{"id": "a"}, {"id": "b"}, {"id": "c"}],
        "edges": [
            {"source": "a", "target": "b"},
            {"source": "b", "target": "c"},
            {"source": "c", "target": "a"}
        ]
    }"#;

    const NO_EDGES: &str = r#"{"nodes": [{"id": "a"}], "edges": []}"#;

    fn setup(graph_count: usize, subset_count: usize) -> (TempDir, PipelineConfig) {
        let dir = TempDir::new().unwrap();
        let graphs = dir.path().join("graphs");
        fs::create_dir(&graphs).unwrap();
        for i in 0..graph_count {
            fs::write(graphs.join(format!("g{:02}.json", i)), TRIANGLE).unwrap();
        }
        let mut config = PipelineConfig::new(graphs, dir.path().join("out"));
        config.subset_count = subset_count;
        (dir, config)
    }

    #[test]
    fn test_plan_snapshots_sorted_records() {
        let (_dir, config) = setup(6, 3);
        let manifest = Manifest::plan(&config).unwrap();

        assert_eq!(manifest.record_count(), 6);
        assert_eq!(manifest.subset_count, 3);
        let mut sorted = manifest.records.clone();
        sorted.sort();
        assert_eq!(manifest.records, sorted);
    }

    #[test]
    fn test_plan_excludes_degenerate_records() {
        let (_dir, config) = setup(4, 2);
        fs::write(config.graphs_dir.join("bad.json"), NO_EDGES).unwrap();

        let manifest = Manifest::plan(&config).unwrap();
        assert_eq!(manifest.record_count(), 4);
        assert!(!manifest.records.contains(&PathBuf::from("bad.json")));
    }

    #[test]
    fn test_plan_rejects_empty_input() {
        let dir = TempDir::new().unwrap();
        let graphs = dir.path().join("graphs");
        fs::create_dir(&graphs).unwrap();
        let config = PipelineConfig::new(graphs, dir.path().join("out"));

        let err = Manifest::plan(&config).unwrap_err();
        assert!(matches!(err, KmatrixError::Configuration(_)));
    }

    #[test]
    fn test_plan_rejects_too_many_subsets() {
        let (_dir, config) = setup(3, 8);
        let err = Manifest::plan(&config).unwrap_err();
        assert!(matches!(err, KmatrixError::Configuration(_)));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (_dir, config) = setup(6, 3);
        config.ensure_directories().unwrap();

        let manifest = Manifest::plan(&config).unwrap();
        manifest.write_to(&config.manifest_path()).unwrap();

        let loaded = Manifest::read_from(&config.manifest_path())
            .unwrap()
            .unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_read_nonexistent() {
        let dir = TempDir::new().unwrap();
        let result = Manifest::read_from(&dir.path().join("manifest.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_tampered_records_rejected() {
        let (_dir, config) = setup(6, 3);
        config.ensure_directories().unwrap();

        let mut manifest = Manifest::plan(&config).unwrap();
        manifest.records.pop();
        manifest.write_to(&config.manifest_path()).unwrap();

        let err = Manifest::read_from(&config.manifest_path()).unwrap_err();
        assert!(matches!(err, KmatrixError::InvalidFormat(_)));
    }

    #[test]
    fn test_digest_depends_on_subset_count() {
        let (_dir, config) = setup(6, 3);
        let manifest_a = Manifest::plan(&config).unwrap();

        let mut config_b = config.clone();
        config_b.subset_count = 2;
        let manifest_b = Manifest::plan(&config_b).unwrap();

        assert_ne!(manifest_a.digest, manifest_b.digest);
        assert_ne!(manifest_a.digest_prefix(), manifest_b.digest_prefix());
    }

    #[test]
    fn test_subset_count_override_must_match() {
        let (_dir, config) = setup(6, 3);
        let manifest = Manifest::plan(&config).unwrap();

        assert!(manifest.require_subset_count(3).is_ok());
        let err = manifest.require_subset_count(2).unwrap_err();
        assert!(matches!(err, KmatrixError::Configuration(_)));
        assert!(err.to_string().contains("planned with 3"));
    }

    #[test]
    fn test_partition_matches_records() {
        let (_dir, config) = setup(7, 3);
        let manifest = Manifest::plan(&config).unwrap();
        let partition = manifest.partition().unwrap();

        assert_eq!(partition.record_count(), 7);
        assert_eq!(partition.subset_count(), 3);
        assert_eq!(manifest.subset_paths(&partition, 0).len(), 3);
        assert_eq!(manifest.subset_paths(&partition, 2).len(), 2);
    }
}
