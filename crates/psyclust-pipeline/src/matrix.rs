//! Dense row-major matrices and distance metrics.
//!
//! Embedding matrices and projections share this representation. Pairwise
//! distance computation is parallel over rows; each row is computed
//! independently, so results do not depend on thread scheduling.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Manhattan,
}

impl Metric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Metric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            Metric::Cosine => {
                let mut dot = 0.0f32;
                let mut na = 0.0f32;
                let mut nb = 0.0f32;
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                if na <= 0.0 || nb <= 0.0 {
                    // A zero vector has no direction; treat it as orthogonal.
                    return 1.0;
                }
                (1.0 - dot / (na.sqrt() * nb.sqrt())).max(0.0)
            }
        }
    }
}

/// Row-major `rows × cols` matrix of `f32`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

/// One fixed-length vector per post id, in ledger order.
pub type EmbeddingMatrix = DenseMatrix;

impl DenseMatrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(PipelineError::invalid_parameter(format!(
                "matrix data has {} values, expected {rows}x{cols}={}",
                data.len(),
                rows * cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build from nested rows; every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let n = rows.len();
        let mut data = Vec::with_capacity(n * cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != cols {
                return Err(PipelineError::invalid_parameter(format!(
                    "ragged matrix: row {i} has {} values, row 0 has {cols}",
                    row.len()
                )));
            }
            data.extend(row);
        }
        Ok(Self {
            rows: n,
            cols,
            data,
        })
    }

    pub fn nrows(&self) -> usize {
        self.rows
    }

    pub fn ncols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.rows).map(move |i| self.row(i))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        self.iter_rows().map(<[f32]>::to_vec).collect()
    }

    /// First `(row, col)` holding a NaN or infinite value.
    pub fn first_non_finite(&self) -> Option<(usize, usize)> {
        let idx = self.data.iter().position(|v| !v.is_finite())?;
        Some((idx / self.cols, idx % self.cols))
    }

    /// Full `n × n` distance matrix, row-major.
    pub fn pairwise_distances(&self, metric: Metric) -> Vec<f32> {
        let n = self.rows;
        let mut out = vec![0.0f32; n * n];
        if n == 0 {
            return out;
        }
        out.par_chunks_mut(n).enumerate().for_each(|(i, dst)| {
            let a = self.row(i);
            for (j, d) in dst.iter_mut().enumerate() {
                if i != j {
                    *d = metric.distance(a, self.row(j));
                }
            }
        });
        out
    }
}
