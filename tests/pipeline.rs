//! Integration test: full plan -> compute -> merge pipeline.
//!
//! Validates that:
//! - The blockwise result equals the kernel run on the whole batch at once
//! - Existing blocks are skipped byte-identically on re-runs
//! - Degenerate records are filtered out at plan time
//! - A missing block aborts the merge, a stale one is rejected
//! - The final artifact round-trips with order and digest intact

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use kmatrix::store::format;
use kmatrix::{
    load_graphs, matrix, reconstruct, write_global_matrix, BlockComputer, DirectoryStore,
    GraphKernel, KmatrixError, Manifest, PipelineConfig, WeisfeilerLehman,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const LABELS: [&str; 5] = ["A", "B", "C", "D", "E"];

fn write_graph(dir: &Path, name: &str, labels: &[&str], edges: &[(usize, usize)]) {
    let nodes: Vec<_> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| json!({"id": format!("n{}", i), "label": label}))
        .collect();
    let edge_objs: Vec<_> = edges
        .iter()
        .map(|(s, t)| json!({"source": format!("n{}", s), "target": format!("n{}", t)}))
        .collect();
    let graph = json!({"nodes": nodes, "edges": edge_objs});
    fs::write(dir.join(name), serde_json::to_string_pretty(&graph).unwrap()).unwrap();
}

/// Deterministic family of small connected graphs: paths and rings of
/// 3 to 6 nodes with rotating label assignments, so similarities are
/// neither all equal nor all zero.
fn seed_graphs(dir: &Path, count: usize) {
    for g in 0..count {
        let n = 3 + g % 4;
        let labels: Vec<&str> = (0..n).map(|v| LABELS[(g + v) % LABELS.len()]).collect();
        let mut edges: Vec<(usize, usize)> = (0..n - 1).map(|v| (v, v + 1)).collect();
        if g % 2 == 0 {
            edges.push((n - 1, 0));
        }
        write_graph(dir, &format!("g{:02}.json", g), &labels, &edges);
    }
}

fn make_graphs_dir(dir: &TempDir, count: usize) -> PathBuf {
    let graphs = dir.path().join("graphs");
    fs::create_dir(&graphs).unwrap();
    seed_graphs(&graphs, count);
    graphs
}

fn plan_batch(graphs_dir: &Path, output_dir: &Path, subsets: usize) -> (PipelineConfig, Manifest) {
    let mut config = PipelineConfig::new(graphs_dir, output_dir);
    config.subset_count = subsets;
    config.wl_iterations = 3;
    config.validate().unwrap();
    config.ensure_directories().unwrap();

    let manifest = Manifest::plan(&config).unwrap();
    manifest.write_to(&config.manifest_path()).unwrap();
    config.write_to(&config.config_path()).unwrap();
    (config, manifest)
}

/// Compute every block and insist on a complete report.
fn compute_blocks(config: &PipelineConfig, manifest: &Manifest) -> (WeisfeilerLehman, DirectoryStore) {
    let kernel = WeisfeilerLehman::new(config.wl_iterations);
    let store = DirectoryStore::new(config.blocks_dir()).unwrap();
    let report = BlockComputer::new(manifest, &kernel, &store)
        .run(false)
        .unwrap();
    assert!(report.complete(), "blocks failed: {:?}", report.failed);
    (kernel, store)
}

fn read_block_bytes(blocks_dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    for entry in fs::read_dir(blocks_dir).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".kmb") {
            out.insert(name, fs::read(entry.path()).unwrap());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests: End-to-End Equivalence
// ---------------------------------------------------------------------------

#[test]
fn blockwise_merge_matches_direct_kernel() {
    let dir = TempDir::new().unwrap();
    let graphs = make_graphs_dir(&dir, 11);

    let (config, manifest) = plan_batch(&graphs, &dir.path().join("out"), 3);
    let (kernel, store) = compute_blocks(&config, &manifest);

    let blockwise = reconstruct(&manifest, &store, kernel.self_similarity()).unwrap();

    // Same kernel over the whole batch in one call.
    let records = load_graphs(&graphs, &manifest.records);
    assert_eq!(records.len(), 11);
    let direct = kernel.compute(&records).unwrap();

    assert_eq!(blockwise.dim(), (11, 11));
    assert!(matrix::is_symmetric(&blockwise, 1e-12));
    assert!(
        matrix::max_abs_diff(&blockwise, &direct) <= 1e-12,
        "blockwise and direct results must agree"
    );
}

#[test]
fn merged_matrix_has_unit_diagonal() {
    let dir = TempDir::new().unwrap();
    let graphs = make_graphs_dir(&dir, 6);

    let (config, manifest) = plan_batch(&graphs, &dir.path().join("out"), 2);
    let (kernel, store) = compute_blocks(&config, &manifest);

    let global = reconstruct(&manifest, &store, kernel.self_similarity()).unwrap();
    for d in 0..6 {
        assert_eq!(global[[d, d]], 1.0);
    }
}

// ---------------------------------------------------------------------------
// Tests: Resumability
// ---------------------------------------------------------------------------

#[test]
fn existing_blocks_skipped_byte_identically() {
    let dir = TempDir::new().unwrap();
    let graphs = make_graphs_dir(&dir, 7);

    let (config, manifest) = plan_batch(&graphs, &dir.path().join("out"), 3);
    let kernel = WeisfeilerLehman::new(config.wl_iterations);
    let store = DirectoryStore::new(config.blocks_dir()).unwrap();
    let computer = BlockComputer::new(&manifest, &kernel, &store);

    let first = computer.run(false).unwrap();
    assert_eq!(first.computed, 3);
    let before = read_block_bytes(store.dir());
    assert_eq!(before.len(), 3);

    let second = computer.run(false).unwrap();
    assert_eq!(second.computed, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(read_block_bytes(store.dir()), before);
}

#[test]
fn resumed_compute_fills_only_missing_blocks() {
    let dir = TempDir::new().unwrap();
    let graphs = make_graphs_dir(&dir, 9);

    let (config, manifest) = plan_batch(&graphs, &dir.path().join("out"), 3);
    let kernel = WeisfeilerLehman::new(config.wl_iterations);
    let store = DirectoryStore::new(config.blocks_dir()).unwrap();
    let computer = BlockComputer::new(&manifest, &kernel, &store);

    computer.run(false).unwrap();
    fs::remove_file(store.dir().join("block_0000_0001.kmb")).unwrap();

    let second = computer.run(false).unwrap();
    assert_eq!(second.computed, 1, "only the deleted block is recomputed");
    assert_eq!(second.skipped, 2);
    assert!(second.complete());

    let global = reconstruct(&manifest, &store, kernel.self_similarity()).unwrap();
    assert_eq!(global.dim(), (9, 9));
}

// ---------------------------------------------------------------------------
// Tests: Planning
// ---------------------------------------------------------------------------

#[test]
fn degenerate_records_filtered_at_plan() {
    let dir = TempDir::new().unwrap();
    let graphs = make_graphs_dir(&dir, 5);
    // Both sort before the healthy records; they must be dropped, not
    // shift the partition.
    fs::write(graphs.join("a_broken.json"), "{ not json").unwrap();
    fs::write(
        graphs.join("a_no_edges.json"),
        r#"{"nodes": [{"id": "x"}], "edges": []}"#,
    )
    .unwrap();

    let (_config, manifest) = plan_batch(&graphs, &dir.path().join("out"), 2);

    assert_eq!(manifest.record_count(), 5);
    assert!(manifest
        .records
        .iter()
        .all(|p| p.to_string_lossy().starts_with('g')));
}

#[test]
fn plan_snapshots_effective_config() {
    let dir = TempDir::new().unwrap();
    let graphs = make_graphs_dir(&dir, 4);

    let (config, _manifest) = plan_batch(&graphs, &dir.path().join("out"), 2);

    let loaded = PipelineConfig::read_from(&config.config_path())
        .unwrap()
        .unwrap();
    assert_eq!(loaded, config);
}

// ---------------------------------------------------------------------------
// Tests: Merge Safety
// ---------------------------------------------------------------------------

#[test]
fn missing_block_is_fatal_at_merge() {
    let dir = TempDir::new().unwrap();
    let graphs = make_graphs_dir(&dir, 7);

    let (config, manifest) = plan_batch(&graphs, &dir.path().join("out"), 3);
    let (kernel, store) = compute_blocks(&config, &manifest);

    fs::remove_file(store.dir().join("block_0000_0002.kmb")).unwrap();

    let err = reconstruct(&manifest, &store, kernel.self_similarity()).unwrap_err();
    match err {
        KmatrixError::MissingBlock { i, j } => assert_eq!((i, j), (0, 2)),
        other => panic!("expected MissingBlock, got {:?}", other),
    }
}

#[test]
fn stale_blocks_rejected_after_replan() {
    let dir = TempDir::new().unwrap();
    let graphs = make_graphs_dir(&dir, 6);

    let (config, manifest) = plan_batch(&graphs, &dir.path().join("out"), 3);
    compute_blocks(&config, &manifest);

    // Replan the same records into a different subset count; the old
    // blocks now carry a foreign manifest digest.
    let mut replanned = config.clone();
    replanned.subset_count = 2;
    let manifest2 = Manifest::plan(&replanned).unwrap();

    let store = DirectoryStore::new(config.blocks_dir()).unwrap();
    let err = reconstruct(&manifest2, &store, 1.0).unwrap_err();
    assert!(matches!(err, KmatrixError::InvalidFormat(_)));
    assert!(err.to_string().contains("different manifest"));
}

// ---------------------------------------------------------------------------
// Tests: Final Artifact
// ---------------------------------------------------------------------------

#[test]
fn final_artifact_roundtrip() {
    let dir = TempDir::new().unwrap();
    let graphs = make_graphs_dir(&dir, 6);

    let (config, manifest) = plan_batch(&graphs, &dir.path().join("out"), 2);
    let (kernel, store) = compute_blocks(&config, &manifest);

    let global = reconstruct(&manifest, &store, kernel.self_similarity()).unwrap();
    let path = config.final_matrix_path();
    write_global_matrix(&path, &manifest, &global).unwrap();

    let (header, loaded) = format::read_final(&path).unwrap();
    assert_eq!(header.order, 6);
    assert_eq!(header.manifest_digest, manifest.digest_prefix());
    assert_eq!(loaded, global);
}
