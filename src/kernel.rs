//! SHAP Kernel Weights
//!
//! The Shapley kernel assigns a coalition of size `s` out of `d` features the
//! weight
//!
//! ```text
//! w(s) = (d − 1) / ( C(d, s) · s · (d − s) )        for 0 < s < d
//! ```
//!
//! The endpoints `s = 0` and `s = d` have infinite weight; they never become
//! regression rows — the base value absorbs the empty coalition and the
//! efficiency constraint pins the full one (see `regression`).
//!
//! ## Numerical care
//! `C(d, s)` overflows `u64` near `d ≈ 60` and `f64` near `d ≈ 1030`, so all
//! binomials are carried as `ln C(d, s)` via a cumulative ln-factorial table
//! and only exponentiated at the end. Per-size masses used by the sampler are
//! normalized, so a `d` large enough to saturate `exp` degrades into sampled
//! sizes with normalized weights instead of producing garbage.

#![forbid(unsafe_code)]

/// Cumulative ln-factorial table: `table[i] = ln(i!)` for `i = 0..=n`.
pub fn ln_factorials(n: usize) -> Vec<f64> {
    let mut table = Vec::with_capacity(n + 1);
    table.push(0.0);
    let mut acc = 0.0;
    for i in 1..=n {
        acc += (i as f64).ln();
        table.push(acc);
    }
    table
}

/// `ln C(d, s)` from a table produced by [`ln_factorials`]`(d)` (or larger).
#[inline]
pub fn ln_binomial(table: &[f64], d: usize, s: usize) -> f64 {
    debug_assert!(s <= d && d < table.len());
    table[d] - table[s] - table[d - s]
}

/// `C(d, s)` in linear space. Saturates to `f64::INFINITY` for very large `d`;
/// callers compare against budgets, where saturation is the right behavior.
#[inline]
pub fn binomial(table: &[f64], d: usize, s: usize) -> f64 {
    ln_binomial(table, d, s).exp()
}

/// Per-size weight `ω(s) = (d−1)/(s(d−s))`, the kernel weight aggregated over
/// all `C(d, s)` coalitions of size `s`.
#[inline]
pub fn size_weight(d: usize, s: usize) -> f64 {
    debug_assert!(0 < s && s < d);
    (d - 1) as f64 / (s * (d - s)) as f64
}

/// Per-coalition kernel weight `w(s)`, computed in log space.
pub fn coalition_weight(table: &[f64], d: usize, s: usize) -> f64 {
    debug_assert!(0 < s && s < d);
    let ln_w = ((d - 1) as f64).ln()
        - ln_binomial(table, d, s)
        - (s as f64).ln()
        - ((d - s) as f64).ln();
    ln_w.exp()
}

/// Number of subset sizes the sampler walks: `ceil((d−1)/2)`. Size `i` stands
/// for the complementary pair `(i, d−i)`; when `d` is even the middle size
/// `d/2` is its own complement.
#[inline]
pub fn num_subset_sizes(d: usize) -> usize {
    // ceil((d − 1) / 2) == floor(d / 2)
    d / 2
}

/// Number of sizes that have a distinct complement: `floor((d−1)/2)`.
#[inline]
pub fn num_paired_subset_sizes(d: usize) -> usize {
    (d - 1) / 2
}

/// Normalized mass per subset-size pair, indexed by `i − 1` for
/// `i = 1 ‥ num_subset_sizes(d)`: `ω(i)`, doubled when `i ≠ d−i`, scaled to
/// sum to 1. This is the distribution the sampler enumerates against and
/// draws sizes from.
pub fn pair_weights(d: usize) -> Vec<f64> {
    debug_assert!(d >= 2);
    let m = num_subset_sizes(d);
    let paired = num_paired_subset_sizes(d);
    let mut w: Vec<f64> = (1..=m)
        .map(|i| {
            let base = size_weight(d, i);
            if i <= paired {
                2.0 * base
            } else {
                base
            }
        })
        .collect();
    let total: f64 = w.iter().sum();
    for v in &mut w {
        *v /= total;
    }
    w
}

// ============================================================================
// Tests
// ============================================================================
