//! Graph similarity kernels.
//!
//! The pipeline treats the kernel as a pluggable collaborator: anything
//! that can turn an ordered batch of records into a symmetric similarity
//! matrix works. [`WeisfeilerLehman`] is the default implementation.

mod wl;

pub use wl::WeisfeilerLehman;

use ndarray::Array2;

use crate::error::Result;
use crate::graph::GraphRecord;

/// A pairwise graph similarity function.
///
/// Implementations must be deterministic for a fixed record order and
/// produce a square, symmetric matrix whose cell `(a, b)` scores
/// `records[a]` against `records[b]`.
pub trait GraphKernel: Send + Sync {
    /// Compute the full pairwise similarity matrix over `records`,
    /// in input order.
    fn compute(&self, records: &[GraphRecord]) -> Result<Array2<f64>>;

    /// The similarity of any record with itself under this kernel.
    /// Used for the diagonal of the reconstructed global matrix.
    fn self_similarity(&self) -> f64;
}
