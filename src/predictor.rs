//! Predictor Seam
//!
//! The explainer treats the model as a black box behind [`Predictor`]: a
//! batched callable `R^{m×d} → R^{m×k}` that is pure with respect to its
//! input rows. Collaborators plug in closures, remote workers, anything —
//! whatever errors they produce flow through as a boxed source and are
//! surfaced unchanged (never retried).
//!
//! [`checked_predict`] is the single call-site wrapper the rest of the crate
//! uses: it validates the returned shape against the submitted batch and
//! scans for non-finite outputs, reporting the offending row.

#![forbid(unsafe_code)]

use crate::matrix::Matrix;

/// Error type collaborator predictors may fail with.
pub type PredictorFault = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A batched black-box model: `m × d` rows in, `m × k` outputs back.
///
/// Implementations must be deterministic in the input rows and independent of
/// row order or hidden state; the explainer relies on this when it averages
/// over background blocks and when it chunks large batches.
pub trait Predictor {
    /// Evaluate the model on every row of `batch`.
    fn predict(&self, batch: &Matrix) -> Result<Matrix, PredictorFault>;
}

impl<F> Predictor for F
where
    F: Fn(&Matrix) -> Result<Matrix, PredictorFault>,
{
    fn predict(&self, batch: &Matrix) -> Result<Matrix, PredictorFault> {
        self(batch)
    }
}

/// Errors surfaced by validated predictor evaluation.
#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    /// Output row/column count does not match the submitted batch.
    #[error(
        "predictor returned a {got_rows}×{got_cols} matrix for a {rows}-row batch (expected {rows}×{expected_cols})"
    )]
    OutputShape {
        /// Row count of the submitted batch.
        rows: usize,
        /// Row count actually returned.
        got_rows: usize,
        /// Column count actually returned.
        got_cols: usize,
        /// Column count expected.
        expected_cols: usize,
    },
    /// Predictor produced NaN/Inf; `row` indexes the submitted batch.
    #[error("predictor produced non-finite value at batch row {row}")]
    NonFinite {
        /// Index of the offending row in the submitted batch.
        row: usize,
    },
    /// The collaborator itself failed; the source is passed through.
    #[error("predictor failed: {0}")]
    Failed(#[source] PredictorFault),
}

/// Evaluate `predictor` on `batch` and validate the result.
///
/// `expected_cols` pins the output arity `k` once it is known (from the
/// background evaluation at construction); pass `None` on that first call.
pub fn checked_predict<P: Predictor>(
    predictor: &P,
    batch: &Matrix,
    expected_cols: Option<usize>,
) -> Result<Matrix, PredictorError> {
    let out = predictor.predict(batch).map_err(PredictorError::Failed)?;
    let expected_cols = expected_cols.unwrap_or(out.cols());
    if out.rows() != batch.rows() || out.cols() != expected_cols || out.cols() == 0 {
        return Err(PredictorError::OutputShape {
            rows: batch.rows(),
            got_rows: out.rows(),
            got_cols: out.cols(),
            expected_cols,
        });
    }
    for i in 0..out.rows() {
        if out.row(i).iter().any(|v| !v.is_finite()) {
            return Err(PredictorError::NonFinite { row: i });
        }
    }
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================
