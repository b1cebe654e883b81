//! Explainer Orchestration
//!
//! Wires the pipeline for one explanation — plan coalitions, build the masked
//! sample matrix, evaluate the predictor, regress — strictly in that order.
//! All state is local to one [`Explainer`]; concurrent explanations are
//! obtained by running independent instances, which share nothing mutable.
//!
//! The per-explanation PRNG is re-derived from the stored seed on every
//! `explain` call, so the method takes `&self` and every call with equal
//! inputs reproduces bitwise-identical attributions.
//!
//! Failures carry enough context to reproduce (seed, `d`, sample budget);
//! nothing is retried and no partial result is ever returned.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coalition::{self, PlanError};
use crate::masking::{MaskingError, SampleMatrix};
use crate::matrix::{Matrix, MatrixError};
use crate::predictor::{checked_predict, Predictor, PredictorError};
use crate::regression::{self, SolveError};
use crate::rng::Lcg64;

/// Errors surfaced by [`Explainer`] construction and explanation.
#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    /// Query length or background width disagrees with the model dimension.
    #[error("query has {got} features but the explainer was built for {expected}")]
    ShapeMismatch {
        /// Feature count actually submitted.
        got: usize,
        /// Feature count the explainer was built for.
        expected: usize,
    },
    /// Structurally invalid or non-finite input data.
    #[error(transparent)]
    Input(#[from] MatrixError),
    /// The sample budget cannot represent the outermost coalition pair.
    #[error("sample budget {got} is too small for {d} features: need at least {min} (seed {seed})")]
    BudgetTooSmall {
        /// Budget actually supplied.
        got: usize,
        /// Number of features.
        d: usize,
        /// Minimum budget required.
        min: usize,
        /// Seed the explainer was constructed with.
        seed: u64,
    },
    /// Predictor evaluation failed (shape, non-finite output, or collaborator error).
    #[error(transparent)]
    Predictor(#[from] PredictorError),
    /// Sample-builder misuse; unreachable from the explainer's own flow.
    #[error(transparent)]
    Masking(#[from] MaskingError),
    /// The regression stayed rank-deficient after ridging.
    #[error("explanation failed for d={d} with {samples} samples (seed {seed}): {source}")]
    Degenerate {
        /// Number of features.
        d: usize,
        /// Number of coalition samples used.
        samples: usize,
        /// Seed the explainer was constructed with.
        seed: u64,
        /// Underlying solve failure.
        #[source]
        source: SolveError,
    },
}

/// Tunables for one `explain` call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainOptions {
    /// Total mask budget `M`. Defaults to `2d + 2048`.
    pub n_samples: Option<usize>,
    /// Ridge multiplier for the regression's normal matrix.
    pub ridge: f64,
    /// Cap on cells (`rows × d`) submitted per predictor call.
    pub max_cell_budget: usize,
}

impl Default for ExplainOptions {
    fn default() -> Self {
        Self {
            n_samples: None,
            ridge: regression::DEFAULT_RIDGE,
            // 16M cells ≈ 128 MiB of f64 per predictor batch.
            max_cell_budget: 1 << 24,
        }
    }
}

/// The result of one explanation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Attribution matrix `φ ∈ R^{d×k}`: row `j` holds feature `j`'s
    /// contribution per output class.
    pub values: Matrix,
    /// Base value `φ_0 ∈ R^k`: mean predictor output over the background.
    pub base_values: Vec<f64>,
    /// The query prediction `f(x) ∈ R^k`.
    pub fx: Vec<f64>,
    /// Number of coalition masks actually regressed over.
    pub samples_used: usize,
}

impl Explanation {
    /// `φ_0,c + Σ_j φ_{j,c}` — equals `fx[c]` up to round-off (efficiency).
    pub fn reconstructed(&self, class: usize) -> f64 {
        let mut acc = self.base_values[class];
        for j in 0..self.values.rows() {
            acc += self.values.get(j, class);
        }
        acc
    }
}

/// KernelSHAP explainer: owns the background data, the predictor reference,
/// and the seed; caches the base value at construction.
pub struct Explainer<P> {
    predictor: P,
    background: Matrix,
    base_values: Vec<f64>,
    num_outputs: usize,
    seed: u64,
}

impl<P: Predictor> Explainer<P> {
    /// Validate the background, evaluate `f(X_bg)` once, and cache
    /// `φ_0 = mean(f(X_bg), axis=0)`.
    pub fn new(predictor: P, background: Matrix, seed: u64) -> Result<Self, ExplainError> {
        if background.rows() == 0 || background.cols() == 0 {
            return Err(MatrixError::Empty {
                rows: background.rows(),
                cols: background.cols(),
            }
            .into());
        }
        background.validate_finite()?;
        let preds = checked_predict(&predictor, &background, None)?;
        let base_values = preds.column_means();
        let num_outputs = preds.cols();
        debug!(
            n = background.rows(),
            d = background.cols(),
            k = num_outputs,
            "explainer ready"
        );
        Ok(Self { predictor, background, base_values, num_outputs, seed })
    }

    /// Number of features `d`.
    #[inline]
    pub fn num_features(&self) -> usize {
        self.background.cols()
    }

    /// Number of predictor outputs `k`.
    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// The cached base value `φ_0`.
    #[inline]
    pub fn base_values(&self) -> &[f64] {
        &self.base_values
    }

    /// Explain a single query point.
    pub fn explain(&self, x: &[f64], opts: &ExplainOptions) -> Result<Explanation, ExplainError> {
        let d = self.num_features();
        let k = self.num_outputs;
        if x.len() != d {
            return Err(ExplainError::ShapeMismatch { got: x.len(), expected: d });
        }
        let query = Matrix::from_rows(&[x.to_vec()])?;
        query.validate_finite()?;
        let fx = checked_predict(&self.predictor, &query, Some(k))?.row(0).to_vec();

        // d = 1: the lone feature carries the whole gap to the base value.
        if d == 1 {
            let mut values = Matrix::zeros(1, k);
            for c in 0..k {
                values.set(0, c, fx[c] - self.base_values[c]);
            }
            return Ok(Explanation {
                values,
                base_values: self.base_values.clone(),
                fx,
                samples_used: 0,
            });
        }

        let budget = opts.n_samples.unwrap_or_else(|| coalition::default_budget(d));
        let mut rng = Lcg64::new(self.seed);
        let plan = coalition::plan_coalitions(d, budget, &mut rng).map_err(|e| match e {
            PlanError::BudgetTooSmall { got, d, min } => {
                ExplainError::BudgetTooSmall { got, d, min, seed: self.seed }
            }
        })?;
        debug!(
            d,
            budget,
            masks = plan.len(),
            enumerated_sizes = plan.fully_enumerated_sizes,
            sampled = plan.num_sampled,
            "coalition plan"
        );

        let mut builder = SampleMatrix::new(&self.background, plan.len());
        for c in &plan.coalitions {
            builder.add_sample(&c.mask, x, c.weight)?;
        }
        let y_bar = builder.mean_predictions(&self.predictor, k, opts.max_cell_budget)?;

        let values = regression::solve_attributions(
            builder.masks(),
            builder.kernel_weights(),
            &y_bar,
            &self.base_values,
            &fx,
            opts.ridge,
        )
        .map_err(|source| ExplainError::Degenerate {
            d,
            samples: builder.samples_added(),
            seed: self.seed,
            source,
        })?;

        Ok(Explanation {
            values,
            base_values: self.base_values.clone(),
            fx,
            samples_used: builder.samples_added(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::PredictorFault;
    use anyhow::Result;

    const IRIS_BETA: [f64; 4] = [-0.1991, 0.3426, 0.0478, 1.03745];
    const IRIS_BIAS: f64 = -1.6689;
    const IRIS_CLASS1: [f64; 5] = [0.7045917, 0.5784162, 0.7342210, 0.5381283, 0.1967100];

    fn iris_background() -> Matrix {
        Matrix::from_rows(&[
            vec![5.8, 2.8, 5.1, 2.4],
            vec![5.8, 2.7, 5.1, 1.9],
            vec![7.2, 3.6, 6.1, 2.5],
            vec![6.2, 2.8, 4.8, 1.8],
            vec![4.9, 3.1, 1.5, 0.1],
        ])
        .unwrap()
    }

    /// Binary logistic regression: columns `[1 − σ, σ]` sum to one.
    fn iris_predictor(batch: &Matrix) -> std::result::Result<Matrix, PredictorFault> {
        let rows: Vec<Vec<f64>> = (0..batch.rows())
            .map(|i| {
                let z: f64 = batch
                    .row(i)
                    .iter()
                    .zip(&IRIS_BETA)
                    .map(|(x, b)| x * b)
                    .sum::<f64>()
                    + IRIS_BIAS;
                let p = 1.0 / (1.0 + (-z).exp());
                vec![1.0 - p, p]
            })
            .collect();
        Ok(Matrix::from_rows(&rows)?)
    }

    #[test]
    fn iris_background_predictions_match_the_fitted_model() -> Result<()> {
        let preds = checked_predict(&iris_predictor, &iris_background(), None)?;
        for (i, expected) in IRIS_CLASS1.iter().enumerate() {
            assert!(
                (preds.get(i, 1) - expected).abs() < 1e-6,
                "row {i}: {} vs {expected}",
                preds.get(i, 1)
            );
        }
        Ok(())
    }

    #[test]
    fn base_value_is_the_background_mean() -> Result<()> {
        let explainer = Explainer::new(iris_predictor, iris_background(), 1)?;
        let expected: f64 = IRIS_CLASS1.iter().sum::<f64>() / IRIS_CLASS1.len() as f64;
        assert!((explainer.base_values()[1] - expected).abs() < 1e-6);
        assert!((explainer.base_values()[0] - (1.0 - expected)).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn efficiency_holds_on_the_iris_query() -> Result<()> {
        let explainer = Explainer::new(iris_predictor, iris_background(), 7)?;
        let x = [5.8, 2.8, 5.1, 2.4];
        // Default budget: 2·4 + 2048 = 2056 masks.
        let expl = explainer.explain(&x, &ExplainOptions::default())?;
        assert!((expl.reconstructed(1) - 0.7045917).abs() < 1e-6);
        assert!((expl.reconstructed(0) - (1.0 - 0.7045917)).abs() < 1e-6);
        // d = 4 enumerates completely; only 14 interior masks exist.
        assert_eq!(expl.samples_used, 14);
        Ok(())
    }

    #[test]
    fn efficiency_holds_per_class_for_three_outputs() -> Result<()> {
        let three = |b: &Matrix| -> std::result::Result<Matrix, PredictorFault> {
            let rows: Vec<Vec<f64>> = (0..b.rows())
                .map(|i| {
                    let r = b.row(i);
                    vec![
                        0.2 * r[0] - 0.7 * r[2],
                        r[1] * r[3],
                        (0.3 * r[0] + 0.1 * r[1]).tanh(),
                    ]
                })
                .collect();
            Ok(Matrix::from_rows(&rows)?)
        };
        let explainer = Explainer::new(three, iris_background(), 99)?;
        let expl = explainer.explain(&[6.0, 3.0, 4.0, 1.5], &ExplainOptions::default())?;
        for c in 0..3 {
            assert!(
                (expl.reconstructed(c) - expl.fx[c]).abs() < 1e-6,
                "class {c}: {} vs {}",
                expl.reconstructed(c),
                expl.fx[c]
            );
        }
        Ok(())
    }

    #[test]
    fn dummy_feature_gets_no_attribution() -> Result<()> {
        // Fifth column is constant zero in background and query; the model
        // ignores it entirely.
        let padded = |b: &Matrix| -> std::result::Result<Matrix, PredictorFault> {
            let rows: Vec<Vec<f64>> = (0..b.rows())
                .map(|i| {
                    let z: f64 = b.row(i)[..4]
                        .iter()
                        .zip(&IRIS_BETA)
                        .map(|(x, c)| x * c)
                        .sum::<f64>()
                        + IRIS_BIAS;
                    let p = 1.0 / (1.0 + (-z).exp());
                    vec![1.0 - p, p]
                })
                .collect();
            Ok(Matrix::from_rows(&rows)?)
        };
        let bg5: Vec<Vec<f64>> = (0..5)
            .map(|i| {
                let mut r = iris_background().row(i).to_vec();
                r.push(0.0);
                r
            })
            .collect();
        let explainer = Explainer::new(padded, Matrix::from_rows(&bg5)?, 21)?;
        let expl = explainer.explain(&[5.8, 2.8, 5.1, 2.4, 0.0], &ExplainOptions::default())?;
        assert!(expl.values.get(4, 1).abs() < 1e-4, "phi_5 = {}", expl.values.get(4, 1));
        Ok(())
    }

    #[test]
    fn exchangeable_features_get_equal_attribution() -> Result<()> {
        // Columns 0 and 1 are identical in the background and the query, and
        // the model is symmetric in them.
        let sym = |b: &Matrix| -> std::result::Result<Matrix, PredictorFault> {
            let rows: Vec<Vec<f64>> = (0..b.rows())
                .map(|i| {
                    let r = b.row(i);
                    let z = r[0] + r[1] + 0.5 * r[2] - 0.2 * r[3];
                    vec![1.0 / (1.0 + (-z).exp())]
                })
                .collect();
            Ok(Matrix::from_rows(&rows)?)
        };
        let bg = Matrix::from_rows(&[
            vec![0.4, 0.4, 1.0, 2.0],
            vec![-1.0, -1.0, 0.0, 1.0],
            vec![2.2, 2.2, -1.0, 0.5],
        ])?;
        let explainer = Explainer::new(sym, bg, 13)?;
        let expl = explainer.explain(&[1.5, 1.5, 0.7, -0.3], &ExplainOptions::default())?;
        let gap = (expl.values.get(0, 0) - expl.values.get(1, 0)).abs();
        assert!(gap < 1e-4, "asymmetry {gap}");
        Ok(())
    }

    #[test]
    fn attributions_are_linear_in_the_predictor() -> Result<()> {
        // d = 6 with a tight budget exercises the Monte-Carlo stage; equal
        // seeds make the plans identical, so linearity holds to round-off.
        let f1 = |b: &Matrix| -> std::result::Result<Matrix, PredictorFault> {
            let rows: Vec<Vec<f64>> =
                (0..b.rows()).map(|i| vec![b.row(i).iter().sum()]).collect();
            Ok(Matrix::from_rows(&rows)?)
        };
        let f2 = |b: &Matrix| -> std::result::Result<Matrix, PredictorFault> {
            let rows: Vec<Vec<f64>> = (0..b.rows())
                .map(|i| vec![b.row(i).iter().map(|v| v * v).sum()])
                .collect();
            Ok(Matrix::from_rows(&rows)?)
        };
        let (alpha, beta) = (2.5, -0.75);
        let combo = move |b: &Matrix| -> std::result::Result<Matrix, PredictorFault> {
            let (a, c) = (f1(b)?, f2(b)?);
            let rows: Vec<Vec<f64>> = (0..b.rows())
                .map(|i| vec![alpha * a.get(i, 0) + beta * c.get(i, 0)])
                .collect();
            Ok(Matrix::from_rows(&rows)?)
        };

        let bg = Matrix::from_rows(&[
            vec![1.0, 0.0, 2.0, -1.0, 0.5, 3.0],
            vec![0.0, 1.0, -2.0, 1.0, 1.5, 0.0],
            vec![2.0, 2.0, 0.0, 0.0, -0.5, 1.0],
        ])?;
        let x = [0.5, -1.0, 1.0, 2.0, 0.0, -2.0];
        let opts = ExplainOptions { n_samples: Some(32), ..Default::default() };

        let e1 = Explainer::new(f1, bg.clone(), 5)?.explain(&x, &opts)?;
        let e2 = Explainer::new(f2, bg.clone(), 5)?.explain(&x, &opts)?;
        let ec = Explainer::new(combo, bg, 5)?.explain(&x, &opts)?;
        assert_eq!(e1.samples_used, 32);
        for j in 0..6 {
            let expected = alpha * e1.values.get(j, 0) + beta * e2.values.get(j, 0);
            assert!(
                (ec.values.get(j, 0) - expected).abs() < 1e-9,
                "feature {j}: {} vs {expected}",
                ec.values.get(j, 0)
            );
        }
        Ok(())
    }

    #[test]
    fn equal_seeds_reproduce_bitwise_attributions() -> Result<()> {
        let bg = Matrix::from_rows(&[
            vec![1.0, 2.0, 0.5, -1.0, 0.0, 1.5, 2.5, -0.5],
            vec![0.0, 1.0, 1.5, 2.0, -1.0, 0.5, 0.0, 1.0],
            vec![2.0, 0.0, -0.5, 1.0, 1.0, -1.5, 1.0, 0.0],
        ])?;
        let model = |b: &Matrix| -> std::result::Result<Matrix, PredictorFault> {
            let rows: Vec<Vec<f64>> = (0..b.rows())
                .map(|i| {
                    let r = b.row(i);
                    vec![r.iter().enumerate().map(|(j, v)| v * (j as f64 + 1.0).sin()).sum()]
                })
                .collect();
            Ok(Matrix::from_rows(&rows)?)
        };
        let x = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
        // Tight budget so the Monte-Carlo stage actually consumes the PRNG.
        let opts = ExplainOptions { n_samples: Some(40), ..Default::default() };

        let ea = Explainer::new(model, bg.clone(), 0xC0FFEE)?;
        let first = ea.explain(&x, &opts)?;
        let second = ea.explain(&x, &opts)?;
        let eb = Explainer::new(model, bg.clone(), 0xC0FFEE)?;
        let other_instance = eb.explain(&x, &opts)?;
        for j in 0..8 {
            let bits = first.values.get(j, 0).to_bits();
            assert_eq!(bits, second.values.get(j, 0).to_bits());
            assert_eq!(bits, other_instance.values.get(j, 0).to_bits());
        }

        let ed = Explainer::new(model, bg, 0xBEEF)?.explain(&x, &opts)?;
        let all_equal =
            (0..8).all(|j| ed.values.get(j, 0).to_bits() == first.values.get(j, 0).to_bits());
        assert!(!all_equal, "a different seed should perturb the estimate");
        Ok(())
    }

    #[test]
    fn single_feature_is_closed_form() -> Result<()> {
        let model = |b: &Matrix| -> std::result::Result<Matrix, PredictorFault> {
            let rows: Vec<Vec<f64>> =
                (0..b.rows()).map(|i| vec![3.0 * b.get(i, 0) + 1.0]).collect();
            Ok(Matrix::from_rows(&rows)?)
        };
        let bg = Matrix::from_rows(&[vec![0.0], vec![2.0]])?;
        let explainer = Explainer::new(model, bg, 3)?;
        let expl = explainer.explain(&[5.0], &ExplainOptions::default())?;
        // base = mean(1, 7) = 4; f(x) = 16; the lone feature carries 12.
        assert!((expl.base_values[0] - 4.0).abs() < 1e-12);
        assert!((expl.values.get(0, 0) - 12.0).abs() < 1e-12);
        assert_eq!(expl.samples_used, 0);
        Ok(())
    }

    #[test]
    fn undersized_budget_is_rejected_with_the_minimum() -> Result<()> {
        let explainer = Explainer::new(iris_predictor, iris_background(), 1)?;
        let opts = ExplainOptions { n_samples: Some(5), ..Default::default() };
        let err = explainer.explain(&[5.8, 2.8, 5.1, 2.4], &opts).unwrap_err();
        match err {
            ExplainError::BudgetTooSmall { got, d, min, seed } => {
                assert_eq!((got, d, min, seed), (5, 4, 8, 1));
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn query_width_mismatch_is_rejected() -> Result<()> {
        let explainer = Explainer::new(iris_predictor, iris_background(), 1)?;
        let err = explainer.explain(&[1.0, 2.0], &ExplainOptions::default()).unwrap_err();
        assert!(matches!(err, ExplainError::ShapeMismatch { got: 2, expected: 4 }));
        Ok(())
    }

    #[test]
    fn non_finite_query_is_rejected() -> Result<()> {
        let explainer = Explainer::new(iris_predictor, iris_background(), 1)?;
        let err = explainer
            .explain(&[5.8, f64::NAN, 5.1, 2.4], &ExplainOptions::default())
            .unwrap_err();
        assert!(matches!(err, ExplainError::Input(MatrixError::NonFinite { .. })));
        Ok(())
    }

    #[test]
    fn nan_producing_predictor_is_surfaced_with_the_row() {
        let nan_model = |b: &Matrix| -> std::result::Result<Matrix, PredictorFault> {
            let mut out = Matrix::zeros(b.rows(), 1);
            if b.rows() > 2 {
                out.set(2, 0, f64::NAN);
            }
            Ok(out)
        };
        let err = match Explainer::new(nan_model, iris_background(), 1) {
            Ok(_) => panic!("construction should fail on non-finite output"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            ExplainError::Predictor(PredictorError::NonFinite { row: 2 })
        ));
    }

    #[test]
    fn chunked_prediction_does_not_change_the_attributions() -> Result<()> {
        let explainer = Explainer::new(iris_predictor, iris_background(), 17)?;
        let x = [6.2, 2.8, 4.8, 1.8];
        let whole = explainer.explain(&x, &ExplainOptions::default())?;
        let tight = ExplainOptions {
            // One 5-row block of 4 features per predictor call.
            max_cell_budget: 20,
            ..Default::default()
        };
        let chunked = explainer.explain(&x, &tight)?;
        for j in 0..4 {
            for c in 0..2 {
                assert_eq!(
                    whole.values.get(j, c).to_bits(),
                    chunked.values.get(j, c).to_bits()
                );
            }
        }
        Ok(())
    }

    #[test]
    fn explanations_serialize_round_trip() -> Result<()> {
        let explainer = Explainer::new(iris_predictor, iris_background(), 2)?;
        let expl = explainer.explain(&[5.8, 2.8, 5.1, 2.4], &ExplainOptions::default())?;
        let json = serde_json::to_string(&expl)?;
        let back: Explanation = serde_json::from_str(&json)?;
        assert_eq!(back, expl);
        Ok(())
    }
}
