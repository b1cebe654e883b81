//! Weighted Constrained Regression
//!
//! The final stage of an explanation: given the mask matrix `Z ∈ {0,1}^{M×d}`,
//! kernel weights `w`, block-mean predictions `yBar ∈ R^{M×k}`, the base
//! value `φ_0` and the target `fx`, solve — independently per output class
//! `c` —
//!
//! ```text
//! minimize    Σ_t w_t ( yBar[t,c] − φ_0,c − Σ_j z_{t,j} φ_{j,c} )²
//! subject to  Σ_j φ_{j,c} = fx_c − φ_0,c
//! ```
//!
//! ## Reduction
//! The constraint eliminates the last coefficient: with `t_c = fx_c − φ_0,c`,
//! substituting `φ_{d−1} = t_c − Σ_{j<d−1} φ_j` turns the problem into an
//! unconstrained weighted least squares in `d−1` unknowns whose design
//! columns are `z_j − z_{d−1}` and whose response is
//! `yBar_c − φ_0,c − z_{d−1}·t_c`. The normal matrix is shared by all `k`
//! classes, so it is factored once (Cholesky) and back-substituted per class;
//! the dropped coefficient is recovered from the constraint, which therefore
//! holds to round-off by construction.
//!
//! A small ridge — `ridge · trace(A)/dim`, i.e. scaled to the mean diagonal —
//! conditions the normal matrix. If a Cholesky pivot still fails to be
//! positive (or is non-finite), the coalition set cannot identify `d−1`
//! directions and the solve reports a degenerate system; the caller's remedy
//! is a larger sample budget.

#![forbid(unsafe_code)]

use tracing::debug;

use crate::matrix::Matrix;

/// Default ridge multiplier applied to the mean diagonal of the normal matrix.
pub const DEFAULT_RIDGE: f64 = 1e-8;

/// Errors surfaced by the constrained solve.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// The normal matrix stayed rank-deficient after ridging.
    #[error("degenerate coalition set: normal matrix of dimension {dim} is not positive definite; increase the sample budget")]
    Degenerate {
        /// Dimension of the rank-deficient normal matrix.
        dim: usize,
    },
}

/// Solve the weighted, efficiency-constrained least squares for every class.
///
/// Inputs: `masks` and `weights` in slot order (length `M`), `y_bar` of shape
/// `M × k`, `base` and `fx` of length `k`. Output: `φ ∈ R^{d×k}` with
/// `Σ_j φ_{j,c} = fx_c − base_c` exact up to floating-point round-off.
pub fn solve_attributions(
    masks: &[Vec<bool>],
    weights: &[f64],
    y_bar: &Matrix,
    base: &[f64],
    fx: &[f64],
    ridge: f64,
) -> Result<Matrix, SolveError> {
    let d = masks.first().map_or(0, |m| m.len());
    let m = masks.len();
    let k = base.len();
    debug_assert!(d >= 2, "the d = 1 case is closed-form and handled upstream");
    debug_assert_eq!(weights.len(), m);
    debug_assert_eq!(y_bar.rows(), m);
    debug_assert_eq!(y_bar.cols(), k);
    debug_assert_eq!(fx.len(), k);

    let dim = d - 1;

    // Normal matrix A = Z'ᵀ W Z' over the reduced design z'_j = z_j − z_{d−1}.
    // Entries of z' lie in {−1, 0, 1}.
    let mut a = Matrix::zeros(dim, dim);
    let mut rhs = Matrix::zeros(dim, k);
    let mut zp = vec![0.0; dim];
    for (t, mask) in masks.iter().enumerate() {
        let w = weights[t];
        if w == 0.0 {
            continue;
        }
        let z_last = if mask[d - 1] { 1.0 } else { 0.0 };
        for (j, slot) in zp.iter_mut().enumerate() {
            *slot = if mask[j] { 1.0 } else { 0.0 } - z_last;
        }
        for i in 0..dim {
            let wi = w * zp[i];
            if wi == 0.0 {
                continue;
            }
            let row = a.row_mut(i);
            for (j, &zpj) in zp.iter().enumerate() {
                row[j] += wi * zpj;
            }
            let out = rhs.row_mut(i);
            for c in 0..k {
                let total = fx[c] - base[c];
                let resp = y_bar.get(t, c) - base[c] - z_last * total;
                out[c] += wi * resp;
            }
        }
    }

    // Mean-diagonal ridge for conditioning.
    let trace: f64 = (0..dim).map(|i| a.get(i, i)).sum();
    let lambda = ridge * trace / dim as f64;
    for i in 0..dim {
        a.set(i, i, a.get(i, i) + lambda);
    }
    debug!(dim, classes = k, lambda, "solving constrained weighted least squares");

    let chol = cholesky_factor(a)?;

    // One factorization, k back-substitutions; last coefficient from the
    // constraint.
    let mut phi = Matrix::zeros(d, k);
    let mut b = vec![0.0; dim];
    for c in 0..k {
        for (i, slot) in b.iter_mut().enumerate() {
            *slot = rhs.get(i, c);
        }
        let head = cholesky_solve(&chol, &b);
        let total = fx[c] - base[c];
        let mut sum_head = 0.0;
        for (j, &v) in head.iter().enumerate() {
            phi.set(j, c, v);
            sum_head += v;
        }
        phi.set(d - 1, c, total - sum_head);
    }
    Ok(phi)
}

/// In-place lower Cholesky factorization `A = L·Lᵀ`.
///
/// Returns the factor with `L` in the lower triangle. A non-positive or
/// non-finite pivot means `A` is not positive definite.
fn cholesky_factor(mut a: Matrix) -> Result<Matrix, SolveError> {
    let n = a.rows();
    for j in 0..n {
        let mut diag = a.get(j, j);
        for p in 0..j {
            let v = a.get(j, p);
            diag -= v * v;
        }
        if !(diag > 0.0) || !diag.is_finite() {
            return Err(SolveError::Degenerate { dim: n });
        }
        let root = diag.sqrt();
        a.set(j, j, root);
        let inv = 1.0 / root;
        for i in j + 1..n {
            let mut v = a.get(i, j);
            for p in 0..j {
                v -= a.get(i, p) * a.get(j, p);
            }
            a.set(i, j, v * inv);
        }
    }
    Ok(a)
}

/// Solve `L·Lᵀ x = b` given the lower factor from [`cholesky_factor`].
fn cholesky_solve(l: &Matrix, b: &[f64]) -> Vec<f64> {
    let n = l.rows();
    // Forward: L y = b.
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut v = b[i];
        for j in 0..i {
            v -= l.get(i, j) * y[j];
        }
        y[i] = v / l.get(i, i);
    }
    // Backward: Lᵀ x = y.
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut v = y[i];
        for j in i + 1..n {
            v -= l.get(j, i) * x[j];
        }
        x[i] = v / l.get(i, i);
    }
    x
}

// ============================================================================
// Tests
// ============================================================================
