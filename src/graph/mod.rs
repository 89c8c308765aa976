//! Graph records: the loaded form of one input file.
//!
//! A record is a labeled undirected graph over dense node indices. The
//! similarity kernel never sees raw files, only `GraphRecord`s, so the
//! on-disk encoding is confined to the loader.

mod loader;

pub use loader::{discover, load_graph, load_graphs};

use std::path::PathBuf;

/// One loaded graph input.
///
/// `node_labels[v]` is the label of node `v`; edges are unordered pairs
/// of node indices. A record always has at least one node and one edge
/// (the loader rejects degenerate graphs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRecord {
    /// Path relative to the batch's graphs directory.
    pub path: PathBuf,
    pub node_labels: Vec<String>,
    pub edges: Vec<(u32, u32)>,
}

impl GraphRecord {
    pub fn node_count(&self) -> usize {
        self.node_labels.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Per-node neighbor lists (both endpoints of every edge).
    ///
    /// Self-loops contribute the node to its own list once; parallel
    /// edges contribute once per occurrence.
    pub fn adjacency(&self) -> Vec<Vec<u32>> {
        let mut adj = vec![Vec::new(); self.node_labels.len()];
        for &(u, v) in &self.edges {
            adj[u as usize].push(v);
            if u != v {
                adj[v as usize].push(u);
            }
        }
        adj
    }
}
