//! Dense Row-Major Matrix
//!
//! A small, concrete `f64` matrix used everywhere in the crate: the background
//! dataset, the synthetic sample matrix, predictor outputs, and the final
//! attribution table are all instances of [`Matrix`].
//!
//! ## Shape discipline
//! - Storage is **row-major**: element `(i, j)` lives at `data[i * cols + j]`.
//! - Row access is a **zero-cost slice view** (`row` / `row_mut`); there is no
//!   runtime slicing language, callers express ranges as index arithmetic.
//! - Constructors validate shape once; after construction `rows * cols ==
//!   data.len()` is an invariant and indexing relies on it.
//!
//! Serde derives are provided so value types built on `Matrix` can cross a
//! worker or process boundary.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

/// Errors surfaced by matrix constructors and validators.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("matrix dimensions {rows}×{cols} do not match buffer length {len}")]
    DimensionMismatch { rows: usize, cols: usize, len: usize },
    #[error("row {row} has {got} columns, expected {expected}")]
    RaggedRow { row: usize, got: usize, expected: usize },
    #[error("matrix must have at least one row and one column (got {rows}×{cols})")]
    Empty { rows: usize, cols: usize },
    #[error("non-finite value at row {row}, column {col}")]
    NonFinite { row: usize, col: usize },
}

/// Dense row-major `f64` matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// All-zero matrix of the given shape.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    /// Build from an explicit row-major buffer, validating the shape.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, MatrixError> {
        if data.len() != rows * cols {
            return Err(MatrixError::DimensionMismatch { rows, cols, len: data.len() });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from a slice of rows, validating that no row is ragged.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, MatrixError> {
        let cols = rows.first().map_or(0, |r| r.len());
        if rows.is_empty() || cols == 0 {
            return Err(MatrixError::Empty { rows: rows.len(), cols });
        }
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, r) in rows.iter().enumerate() {
            if r.len() != cols {
                return Err(MatrixError::RaggedRow { row: i, got: r.len(), expected: cols });
            }
            data.extend_from_slice(r);
        }
        Ok(Self { rows: rows.len(), cols, data })
    }

    /// Stack `times` copies of `block` along the row axis.
    pub fn tiled(block: &Matrix, times: usize) -> Self {
        let mut data = Vec::with_capacity(block.data.len() * times);
        for _ in 0..times {
            data.extend_from_slice(&block.data);
        }
        Self { rows: block.rows * times, cols: block.cols, data }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Row `i` as a slice view.
    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        debug_assert!(i < self.rows, "row index out of range");
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Row `i` as a mutable slice view.
    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        debug_assert!(i < self.rows, "row index out of range");
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.data[i * self.cols + j] = v;
    }

    /// The underlying row-major buffer.
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Copy the half-open row range `[start, end)` into a new matrix.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= self.rows, "row range out of bounds");
        Self {
            rows: end - start,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
        }
    }

    /// Per-column mean over all rows.
    pub fn column_means(&self) -> Vec<f64> {
        let mut means = vec![0.0; self.cols];
        for i in 0..self.rows {
            let r = self.row(i);
            for (m, v) in means.iter_mut().zip(r) {
                *m += v;
            }
        }
        let inv = 1.0 / self.rows as f64;
        for m in &mut means {
            *m *= inv;
        }
        means
    }

    /// Check every entry is finite; reports the first offending coordinate.
    pub fn validate_finite(&self) -> Result<(), MatrixError> {
        for (idx, v) in self.data.iter().enumerate() {
            if !v.is_finite() {
                return Err(MatrixError::NonFinite { row: idx / self.cols, col: idx % self.cols });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
