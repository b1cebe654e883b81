//! Synthetic Sample Builder (masking)
//!
//! For every selected coalition the explainer needs the expectation
//! `E[f(x_S ∪ X_\bar{S})]` over the background distribution. This module
//! materializes that as a dense matrix `S ∈ R^{M·n × d}`: the background
//! tiled `M` times along the row axis, with each mask's `n`-row block
//! overwritten column-wise by the query value wherever the feature is
//! present. One predictor pass (or a few, when chunked) then collapses the
//! `M·n × k` output into block means `yBar ∈ R^{M × k}`.
//!
//! ## Chunking
//! `S` is allocated once per explanation. When `M·n·d` exceeds the caller's
//! cell budget, the predictor is invoked on contiguous row ranges instead of
//! the whole matrix — always on whole `n`-row block boundaries, so the
//! per-block summation order (and therefore the result, bitwise) does not
//! depend on where the chunk cuts fall.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use tracing::debug;

use crate::matrix::Matrix;
use crate::predictor::{checked_predict, Predictor, PredictorError};

/// Errors surfaced by the sample builder. These indicate caller misuse; the
/// explainer's own flow cannot reach them.
#[derive(Debug, thiserror::Error)]
pub enum MaskingError {
    #[error("mask has {got} features, builder expects {expected}")]
    MaskWidth { got: usize, expected: usize },
    #[error("query has {got} features, builder expects {expected}")]
    QueryWidth { got: usize, expected: usize },
    #[error("all {capacity} sample slots are filled")]
    SlotsExhausted { capacity: usize },
}

/// Builder for the masked synthetic sample matrix of one explanation.
pub struct SampleMatrix {
    s: Matrix,
    n_background: usize,
    num_features: usize,
    capacity: usize,
    masks: Vec<Vec<bool>>,
    kernel_weights: Vec<f64>,
    samples_added: usize,
}

impl SampleMatrix {
    /// Tile `background` `capacity` times; every slot starts as a pristine
    /// copy of the background block.
    pub fn new(background: &Matrix, capacity: usize) -> Self {
        Self {
            s: Matrix::tiled(background, capacity),
            n_background: background.rows(),
            num_features: background.cols(),
            capacity,
            masks: Vec::with_capacity(capacity),
            kernel_weights: Vec::with_capacity(capacity),
            samples_added: 0,
        }
    }

    /// Number of masks added so far.
    #[inline]
    pub fn samples_added(&self) -> usize {
        self.samples_added
    }

    /// Kernel weight per filled slot, in slot order.
    #[inline]
    pub fn kernel_weights(&self) -> &[f64] {
        &self.kernel_weights
    }

    /// Masks per filled slot, in slot order.
    #[inline]
    pub fn masks(&self) -> &[Vec<bool>] {
        &self.masks
    }

    /// The synthetic matrix itself (rows `[t·n, (t+1)·n)` belong to slot `t`).
    #[inline]
    pub fn matrix(&self) -> &Matrix {
        &self.s
    }

    /// Fill the next slot: overwrite column `j` of the slot's block with
    /// `x[j]` wherever `mask[j]` is set; absent columns keep the background.
    pub fn add_sample(&mut self, mask: &[bool], x: &[f64], weight: f64) -> Result<(), MaskingError> {
        if mask.len() != self.num_features {
            return Err(MaskingError::MaskWidth { got: mask.len(), expected: self.num_features });
        }
        if x.len() != self.num_features {
            return Err(MaskingError::QueryWidth { got: x.len(), expected: self.num_features });
        }
        if self.samples_added == self.capacity {
            return Err(MaskingError::SlotsExhausted { capacity: self.capacity });
        }
        let t = self.samples_added;
        let start = t * self.n_background;
        for i in start..start + self.n_background {
            let row = self.s.row_mut(i);
            for (j, (&present, &xj)) in mask.iter().zip(x).enumerate() {
                if present {
                    row[j] = xj;
                }
            }
        }
        self.masks.push(mask.to_vec());
        self.kernel_weights.push(weight);
        self.samples_added += 1;
        Ok(())
    }

    /// Run the predictor over every filled slot and average each `n`-row
    /// block, producing `yBar ∈ R^{M × k}`.
    ///
    /// `expected_cols` pins the predictor arity `k`; `max_cell_budget` caps
    /// the cells (`rows × d`) submitted per predictor call. At least one
    /// whole block is submitted per call even when a single block exceeds
    /// the budget.
    pub fn mean_predictions<P: Predictor>(
        &self,
        predictor: &P,
        expected_cols: usize,
        max_cell_budget: usize,
    ) -> Result<Matrix, PredictorError> {
        let n = self.n_background;
        let d = self.num_features;
        let m = self.samples_added;
        let slots_per_chunk = (max_cell_budget / (n * d)).max(1).min(m.max(1));

        let mut y_bar = Matrix::zeros(m, expected_cols);
        let mut chunks = 0usize;
        let mut slot = 0usize;
        while slot < m {
            let chunk_end = (slot + slots_per_chunk).min(m);
            let preds = if slot == 0 && chunk_end == m && self.capacity == m {
                checked_predict(predictor, &self.s, Some(expected_cols))?
            } else {
                let batch = self.s.slice_rows(slot * n, chunk_end * n);
                checked_predict(predictor, &batch, Some(expected_cols))?
            };
            for t in slot..chunk_end {
                let base = (t - slot) * n;
                let out = y_bar.row_mut(t);
                for i in 0..n {
                    for (acc, &v) in out.iter_mut().zip(preds.row(base + i)) {
                        *acc += v;
                    }
                }
                let inv = 1.0 / n as f64;
                for acc in out.iter_mut() {
                    *acc *= inv;
                }
            }
            chunks += 1;
            slot = chunk_end;
        }
        debug!(slots = m, chunks, rows_per_chunk = slots_per_chunk * n, "averaged predictions");
        Ok(y_bar)
    }
}

// ============================================================================
// Tests
// ============================================================================
