//! Dense matrix helpers shared by kernel, merge, and tests.

use ndarray::Array2;

/// Check that `m` is square and symmetric within `tol`.
pub fn is_symmetric(m: &Array2<f64>, tol: f64) -> bool {
    let n = m.nrows();
    if m.ncols() != n {
        return false;
    }
    for a in 0..n {
        for b in (a + 1)..n {
            if (m[[a, b]] - m[[b, a]]).abs() > tol {
                return false;
            }
        }
    }
    true
}

/// Largest absolute elementwise difference between two matrices.
///
/// # Panics
///
/// Panics if the shapes differ.
pub fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    assert_eq!(a.dim(), b.dim(), "shape mismatch: {:?} vs {:?}", a.dim(), b.dim());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Normalize a raw kernel matrix to unit diagonal in place:
/// `k'[a, b] = k[a, b] / sqrt(k[a, a] * k[b, b])`.
///
/// A cell whose diagonal product is not strictly positive becomes 0.0
/// instead of NaN (feature-less inputs are filtered upstream, so this
/// only guards against them reappearing).
pub fn normalize_in_place(k: &mut Array2<f64>) {
    let n = k.nrows();
    debug_assert_eq!(k.ncols(), n, "kernel matrix must be square");
    let diag: Vec<f64> = (0..n).map(|i| k[[i, i]]).collect();
    for a in 0..n {
        for b in 0..n {
            let denom = diag[a] * diag[b];
            k[[a, b]] = if denom > 0.0 {
                k[[a, b]] / denom.sqrt()
            } else {
                0.0
            };
        }
    }
}
