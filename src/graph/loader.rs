//! Discovery and loading of graph files.
//!
//! Input files use node-link JSON, one graph per file:
//!
//! ```text
//! {
//!   "nodes": [{"id": "n0", "label": "A"}, {"id": "n1"}],
//!   "edges": [{"source": "n0", "target": "n1"}]
//! }
//! ```
//!
//! A node without a `label` uses its `id` as the label. Discovery order
//! is a lexicographic sort of paths relative to the graphs directory;
//! that order defines the global record index used by every phase, so it
//! must not depend on filesystem enumeration order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Deserialize;

use crate::error::{KmatrixError, Result};
use crate::graph::GraphRecord;

#[derive(Deserialize)]
struct RawGraph {
    #[serde(default)]
    nodes: Vec<RawNode>,
    #[serde(default)]
    edges: Vec<RawEdge>,
}

#[derive(Deserialize)]
struct RawNode {
    id: String,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Deserialize)]
struct RawEdge {
    source: String,
    target: String,
}

/// List files under `dir` matching `pattern`, sorted lexicographically
/// by path relative to `dir`.
pub fn discover(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = dir.join(pattern);
    let full = full.to_string_lossy();

    let mut paths = Vec::new();
    for entry in glob::glob(&full)? {
        let path = entry.map_err(|e| KmatrixError::Io(e.into_error()))?;
        if path.is_file() {
            let rel = path.strip_prefix(dir).unwrap_or(&path).to_path_buf();
            paths.push(rel);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load and validate a single graph file.
///
/// Fails with `RecordLoad` on unreadable files, malformed JSON, unknown
/// edge endpoints, duplicate node ids, and degenerate graphs (zero nodes
/// or zero edges).
pub fn load_graph(dir: &Path, rel_path: &Path) -> Result<GraphRecord> {
    let record_err = |reason: String| KmatrixError::RecordLoad {
        path: rel_path.display().to_string(),
        reason,
    };

    let bytes = std::fs::read(dir.join(rel_path))
        .map_err(|e| record_err(e.to_string()))?;
    let raw: RawGraph =
        serde_json::from_slice(&bytes).map_err(|e| record_err(e.to_string()))?;

    if raw.nodes.is_empty() {
        return Err(record_err("graph has no nodes".to_string()));
    }
    if raw.edges.is_empty() {
        return Err(record_err("graph has no edges".to_string()));
    }

    let mut index: HashMap<&str, u32> = HashMap::with_capacity(raw.nodes.len());
    let mut node_labels = Vec::with_capacity(raw.nodes.len());
    for (i, node) in raw.nodes.iter().enumerate() {
        if index.insert(node.id.as_str(), i as u32).is_some() {
            return Err(record_err(format!("duplicate node id '{}'", node.id)));
        }
        node_labels.push(node.label.clone().unwrap_or_else(|| node.id.clone()));
    }

    let mut edges = Vec::with_capacity(raw.edges.len());
    for edge in &raw.edges {
        let resolve = |id: &str| {
            index
                .get(id)
                .copied()
                .ok_or_else(|| record_err(format!("edge references unknown node '{}'", id)))
        };
        edges.push((resolve(&edge.source)?, resolve(&edge.target)?));
    }

    Ok(GraphRecord {
        path: rel_path.to_path_buf(),
        node_labels,
        edges,
    })
}

/// Load many graphs in parallel, preserving input order.
///
/// Records that fail to load are dropped with a warning; the returned
/// vector may therefore be shorter than `rel_paths`. Callers that need
/// exact correspondence with a planned subset must compare lengths.
pub fn load_graphs(dir: &Path, rel_paths: &[PathBuf]) -> Vec<GraphRecord> {
    rel_paths
        .par_iter()
        .map(|rel| match load_graph(dir, rel) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("dropping record {}: {}", rel.display(), e);
                None
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}
