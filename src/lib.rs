//! Crate root: public surface and crate-wide invariants
//!
//! `kernelshap` is a model-agnostic attribution core: given a black-box
//! predictor `f: R^d → R^k`, a background dataset `X_bg ∈ R^{n×d}`, and a
//! query `x ∈ R^d`, it estimates Shapley values `φ ∈ R^{d×k}` with the
//! KernelSHAP weighted-regression formulation.
//!
//! ## Invariants
//!
//! - **Efficiency.** For every class `c`, `φ_0,c + Σ_j φ_{j,c}` equals
//!   `f(x)_c` up to floating-point round-off; the regression enforces this as
//!   an equality constraint, never as a penalty.
//! - **Base value.** `φ_0 = mean(f(X_bg), axis=0)`, computed once at
//!   construction and cached.
//! - **Determinism.** All randomness flows through an injected seeded LCG;
//!   equal `(inputs, seed)` reproduce bitwise-identical attributions. There
//!   is no ambient random source and no hidden state.
//! - **Budget.** An explanation regresses over at most `M` coalition masks
//!   (default `2d + 2048`); subset sizes whose complementary pair fits the
//!   remaining budget are enumerated exhaustively, the rest are Monte-Carlo
//!   sampled with complement pairing.
//! - **Sequential core.** Planning, masking, prediction, and regression run
//!   strictly in order with no internal threads; concurrency is obtained by
//!   running independent [`Explainer`] instances.
//!
//! Failure modes are precise errors (never panics in library flow): shape
//! mismatches, undersized budgets, non-finite predictor output (with the
//! offending row), collaborator failures (passed through, never retried),
//! and degenerate regression systems.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Dense row-major `f64` matrix with zero-cost row views.
pub mod matrix;
/// Injected deterministic PRNG (64-bit LCG).
pub mod rng;
/// SHAP kernel weight math (log-space binomials, per-size masses).
pub mod kernel;
/// Coalition enumeration & Monte-Carlo sampling under a mask budget.
pub mod coalition;
/// Predictor trait, validation, and error wrapping.
pub mod predictor;
/// Masked synthetic sample matrix and block-mean predictions.
pub mod masking;
/// Weighted, efficiency-constrained least squares.
pub mod regression;
/// The per-explanation orchestrator.
pub mod explainer;

// ============================================================================
// Canonical re-exports (single definition sites, importable from the root)
// ============================================================================

pub use crate::coalition::{
    default_budget, Coalition, CoalitionPlan, PlanError, DEFAULT_EXTRA_SAMPLES,
};
pub use crate::explainer::{ExplainError, ExplainOptions, Explainer, Explanation};
pub use crate::matrix::{Matrix, MatrixError};
pub use crate::predictor::{Predictor, PredictorError, PredictorFault};
pub use crate::regression::{SolveError, DEFAULT_RIDGE};
pub use crate::rng::Lcg64;
