//! Weisfeiler-Lehman subtree kernel over a vertex-histogram base.
//!
//! Round 0 interns every node's raw label into a dense symbol. Each
//! refinement round relabels a node with its current symbol plus the
//! sorted symbols of its neighbors, interned as a fresh signature. After
//! every round the per-graph symbol histograms contribute one Gram term
//! (dot product of histograms), and the summed Gram is normalized to
//! unit diagonal.
//!
//! The symbol table is shared across the whole batch, which is what
//! makes histograms comparable between graphs. Sorting neighbor symbols
//! keeps the refinement independent of edge declaration order, and
//! interning in record order keeps the whole computation deterministic.
//! Kernel values depend only on label equivalence classes, never on the
//! numeric symbols, so a pair's similarity does not change with the
//! composition of the batch it was computed in.

use std::collections::HashMap;

use ndarray::Array2;
use rayon::prelude::*;

use crate::error::Result;
use crate::graph::GraphRecord;
use crate::kernel::GraphKernel;
use crate::matrix;

/// Shared symbol table: label string -> dense id, in first-seen order.
#[derive(Default)]
struct LabelInterner {
    symbols: HashMap<String, u32>,
}

impl LabelInterner {
    fn intern(&mut self, label: &str) -> u32 {
        if let Some(&id) = self.symbols.get(label) {
            return id;
        }
        let id = self.symbols.len() as u32;
        self.symbols.insert(label.to_string(), id);
        id
    }

    fn len(&self) -> usize {
        self.symbols.len()
    }
}

/// Weisfeiler-Lehman subtree kernel, normalized to unit diagonal.
#[derive(Debug, Clone)]
pub struct WeisfeilerLehman {
    iterations: usize,
}

impl WeisfeilerLehman {
    /// Kernel with `iterations` refinement rounds on top of the raw
    /// label histogram (round 0).
    pub fn new(iterations: usize) -> Self {
        Self { iterations }
    }
}

impl GraphKernel for WeisfeilerLehman {
    fn compute(&self, records: &[GraphRecord]) -> Result<Array2<f64>> {
        let n = records.len();
        let adjacency: Vec<Vec<Vec<u32>>> =
            records.iter().map(|r| r.adjacency()).collect();

        let mut interner = LabelInterner::default();
        let mut symbols: Vec<Vec<u32>> = records
            .iter()
            .map(|r| r.node_labels.iter().map(|l| interner.intern(l)).collect())
            .collect();

        let mut gram = Array2::<f64>::zeros((n, n));
        accumulate_round(&mut gram, &symbols);

        for _ in 0..self.iterations {
            symbols = refine(&mut interner, &symbols, &adjacency);
            accumulate_round(&mut gram, &symbols);
        }

        tracing::debug!(
            records = n,
            rounds = self.iterations + 1,
            symbols = interner.len(),
            "computed WL gram matrix"
        );

        matrix::normalize_in_place(&mut gram);
        Ok(gram)
    }

    fn self_similarity(&self) -> f64 {
        1.0
    }
}

/// One refinement round: every node's new symbol is the interned
/// signature `current|sorted neighbor symbols`.
fn refine(
    interner: &mut LabelInterner,
    symbols: &[Vec<u32>],
    adjacency: &[Vec<Vec<u32>>],
) -> Vec<Vec<u32>> {
    symbols
        .iter()
        .zip(adjacency)
        .map(|(syms, adj)| {
            (0..syms.len())
                .map(|v| {
                    let mut neigh: Vec<u32> =
                        adj[v].iter().map(|&u| syms[u as usize]).collect();
                    neigh.sort_unstable();
                    let neigh: Vec<String> =
                        neigh.iter().map(u32::to_string).collect();
                    interner.intern(&format!("{}|{}", syms[v], neigh.join(",")))
                })
                .collect()
        })
        .collect()
}

/// Add this round's histogram dot products into the Gram matrix.
///
/// Fills the upper triangle in parallel (one task per row), then
/// mirrors. O(n^2) dot products, each linear in the smaller histogram.
fn accumulate_round(gram: &mut Array2<f64>, symbols: &[Vec<u32>]) {
    let n = symbols.len();
    let histograms: Vec<HashMap<u32, f64>> = symbols
        .iter()
        .map(|syms| {
            let mut h = HashMap::new();
            for &s in syms {
                *h.entry(s).or_insert(0.0) += 1.0;
            }
            h
        })
        .collect();

    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|a| (a..n).map(|b| dot(&histograms[a], &histograms[b])).collect())
        .collect();

    for (a, row) in rows.iter().enumerate() {
        for (offset, &d) in row.iter().enumerate() {
            let b = a + offset;
            gram[[a, b]] += d;
            if a != b {
                gram[[b, a]] += d;
            }
        }
    }
}

/// Sparse dot product of two count histograms. Iterates the smaller one.
fn dot(x: &HashMap<u32, f64>, y: &HashMap<u32, f64>) -> f64 {
    let (small, large) = if x.len() <= y.len() { (x, y) } else { (y, x) };
    small
        .iter()
        .filter_map(|(k, v)| large.get(k).map(|w| v * w))
        .sum()
}
