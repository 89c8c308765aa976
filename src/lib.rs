//! kmatrix - blockwise graph similarity matrices
//!
//! Computes an N x N graph kernel similarity matrix over a directory of
//! graph records without ever holding the full batch in memory. The
//! record list is partitioned into K contiguous subsets; every subset
//! pair (i, j) with i < j is loaded, pushed through the kernel and
//! persisted as one block matrix. A separate merge step reassembles the
//! blocks into the global matrix, recovering within-subset similarities
//! from the off-diagonal blocks that already contain them.
//!
//! Pipeline stages:
//!   plan    - snapshot the record list into a manifest
//!   compute - produce the per-pair block matrices (resumable)
//!   merge   - reconstruct and persist the final N x N matrix

pub mod compute;
pub mod config;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod manifest;
pub mod matrix;
pub mod partition;
pub mod reconstruct;
pub mod store;

pub use compute::{BlockComputer, ComputeReport};
pub use config::PipelineConfig;
pub use error::{KmatrixError, Result};
pub use graph::{discover, load_graph, load_graphs, GraphRecord};
pub use kernel::{GraphKernel, WeisfeilerLehman};
pub use manifest::Manifest;
pub use partition::{subset_pairs, Partition};
pub use reconstruct::{reconstruct, write_global_matrix};
pub use store::{BlockHeader, BlockStore, DirectoryStore, FinalHeader};
