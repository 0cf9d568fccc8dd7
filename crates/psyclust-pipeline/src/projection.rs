//! Projection engine: neighbourhood-preserving reduction of embeddings.
//!
//! ```text
//! embeddings ──► k-NN graph ──► fuzzy simplicial set ──► SGD layout ──► n × k
//!               (exact, metric)   (rho/sigma per point,    (seeded init,
//!                                  fuzzy-union symmetric)   attract/repel)
//! ```
//!
//! The reducer follows the UMAP construction. Output is deterministic for a
//! fixed seed and input; exact coordinates are not stable across versions of
//! this crate or of `rand`, so callers should only rely on shape and range.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::matrix::{DenseMatrix, Metric};

const SMOOTH_K_TOLERANCE: f32 = 1e-5;
const MIN_K_DIST_SCALE: f32 = 1e-3;
const GRADIENT_CLIP: f32 = 4.0;
const INIT_RANGE: f32 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionParams {
    /// Neighbourhood size; clamped to `n - 1` for small inputs.
    pub n_neighbors: usize,
    /// Output dimensionality.
    pub n_components: usize,
    pub min_dist: f32,
    pub spread: f32,
    pub metric: Metric,
    /// Optimisation epochs; `None` picks 500 for small inputs, 200 otherwise.
    pub n_epochs: Option<usize>,
    pub learning_rate: f32,
    pub negative_sample_rate: usize,
    pub seed: u64,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            n_neighbors: 15,
            n_components: 2,
            min_dist: 0.1,
            spread: 1.0,
            metric: Metric::Cosine,
            n_epochs: None,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            seed: 42,
        }
    }
}

impl ProjectionParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_neighbors < 2 {
            return Err(PipelineError::invalid_parameter(format!(
                "n_neighbors must be >= 2, got {}",
                self.n_neighbors
            )));
        }
        if self.n_components == 0 {
            return Err(PipelineError::invalid_parameter(
                "n_components must be >= 1",
            ));
        }
        if !(self.spread > 0.0) {
            return Err(PipelineError::invalid_parameter(format!(
                "spread must be > 0, got {}",
                self.spread
            )));
        }
        if !(0.0..=self.spread).contains(&self.min_dist) {
            return Err(PipelineError::invalid_parameter(format!(
                "min_dist must lie in [0, spread={}], got {}",
                self.spread, self.min_dist
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(PipelineError::invalid_parameter(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }

    /// Neighbourhood size actually used for `n` rows.
    pub fn effective_neighbors(&self, n: usize) -> usize {
        self.n_neighbors.min(n.saturating_sub(1)).max(1)
    }

    fn epochs_for(&self, n: usize) -> usize {
        self.n_epochs
            .unwrap_or(if n <= 10_000 { 500 } else { 200 })
            .max(1)
    }
}

/// Reduce `embeddings` to `n × params.n_components` coordinates.
///
/// The input is borrowed immutably; the result is a fresh matrix.
pub fn project(embeddings: &DenseMatrix, params: &ProjectionParams) -> Result<DenseMatrix> {
    params.validate()?;
    let n = embeddings.nrows();
    if n < 2 {
        return Err(PipelineError::InsufficientData {
            stage: "projection",
            required: 2,
            actual: n,
        });
    }
    if embeddings.ncols() == 0 {
        return Err(PipelineError::invalid_parameter(
            "embedding matrix has zero width",
        ));
    }
    if let Some((row, col)) = embeddings.first_non_finite() {
        return Err(PipelineError::invalid_parameter(format!(
            "embedding matrix holds a non-finite value at row {row}, column {col}"
        )));
    }

    let k = params.effective_neighbors(n);
    tracing::debug!(rows = n, neighbors = k, metric = ?params.metric, "building k-NN graph");

    let distances = embeddings.pairwise_distances(params.metric);
    let knn = nearest_neighbors(&distances, n, k);
    let edges = fuzzy_simplicial_set(&knn, k);
    let (a, b) = find_ab_params(params.spread, params.min_dist);

    let layout = optimize_layout(n, &edges, a, b, params);
    tracing::debug!(rows = n, edges = edges.len(), a, b, "projection complete");
    Ok(layout)
}

/// A cached projection, tagged with the embeddings digest and parameters it
/// was computed from. A mismatch on either means it must be regenerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionArtifact {
    pub source_digest: String,
    pub params: ProjectionParams,
    pub coordinates: DenseMatrix,
}

impl ProjectionArtifact {
    pub const ARTIFACT: &'static str = "projection";

    pub fn is_current(&self, source_digest: &str, params: &ProjectionParams) -> bool {
        self.source_digest == source_digest && &self.params == params
    }
}

/// Per row, the `k` nearest other rows as `(index, distance)`, nearest first.
/// Ties break on index so the graph is independent of scheduling.
fn nearest_neighbors(distances: &[f32], n: usize, k: usize) -> Vec<Vec<(usize, f32)>> {
    (0..n)
        .into_par_iter()
        .map(|i| {
            let row = &distances[i * n..(i + 1) * n];
            let mut cand: Vec<(usize, f32)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, row[j]))
                .collect();
            cand.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
            cand.truncate(k);
            cand
        })
        .collect()
}

/// Membership strengths of the symmetrised neighbour graph, keyed `(i, j)`
/// with `i < j`.
fn fuzzy_simplicial_set(knn: &[Vec<(usize, f32)>], k: usize) -> Vec<(usize, usize, f32)> {
    let target = (k as f32).log2().max(SMOOTH_K_TOLERANCE);
    let mean_all: f32 = {
        let (sum, count) = knn
            .iter()
            .flatten()
            .fold((0.0f32, 0usize), |(s, c), (_, d)| (s + d, c + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    };

    // (i, j) -> (w_ij, w_ji)
    let mut pairs: BTreeMap<(usize, usize), (f32, f32)> = BTreeMap::new();
    for (i, neighbors) in knn.iter().enumerate() {
        let rho = neighbors
            .iter()
            .map(|&(_, d)| d)
            .find(|&d| d > 0.0)
            .unwrap_or(0.0);
        let sigma = smooth_knn_sigma(neighbors, rho, target, mean_all);

        for &(j, d) in neighbors {
            let w = if d - rho <= 0.0 {
                1.0
            } else {
                (-(d - rho) / sigma).exp()
            };
            let entry = pairs.entry((i.min(j), i.max(j))).or_insert((0.0, 0.0));
            if i < j {
                entry.0 = entry.0.max(w);
            } else {
                entry.1 = entry.1.max(w);
            }
        }
    }

    pairs
        .into_iter()
        .filter_map(|((i, j), (w_ij, w_ji))| {
            let w = w_ij + w_ji - w_ij * w_ji;
            (w > 0.0).then_some((i, j, w))
        })
        .collect()
}

/// Binary search for the bandwidth that makes the neighbour weights sum to
/// `target`.
fn smooth_knn_sigma(neighbors: &[(usize, f32)], rho: f32, target: f32, mean_all: f32) -> f32 {
    let mut lo = 0.0f32;
    let mut hi = f32::INFINITY;
    let mut mid = 1.0f32;

    for _ in 0..64 {
        let psum: f32 = neighbors
            .iter()
            .map(|&(_, d)| {
                let gap = d - rho;
                if gap > 0.0 {
                    (-gap / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();

        if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    let mean_local = if neighbors.is_empty() {
        0.0
    } else {
        neighbors.iter().map(|&(_, d)| d).sum::<f32>() / neighbors.len() as f32
    };
    let floor = if rho > 0.0 {
        MIN_K_DIST_SCALE * mean_local
    } else {
        MIN_K_DIST_SCALE * mean_all
    };
    mid.max(floor).max(f32::MIN_POSITIVE)
}

/// Fit `1 / (1 + a·x^(2b))` to the offset-exponential target curve.
///
/// A coarse grid search followed by three local refinements; cheap and
/// deterministic.
pub fn find_ab_params(spread: f32, min_dist: f32) -> (f32, f32) {
    let xs: Vec<f32> = (0..300).map(|i| 3.0 * spread * i as f32 / 299.0).collect();
    let ys: Vec<f32> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();
    let loss = |a: f32, b: f32| -> f32 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (f - y) * (f - y)
            })
            .sum()
    };

    let (mut best_a, mut best_b) = (1.0f32, 1.0f32);
    let mut best = loss(best_a, best_b);
    let (mut a_lo, mut a_hi, mut b_lo, mut b_hi) = (0.01f32, 5.0f32, 0.1f32, 2.0f32);
    for _ in 0..4 {
        for ai in 0..=40 {
            let a = a_lo + (a_hi - a_lo) * ai as f32 / 40.0;
            for bi in 0..=40 {
                let b = b_lo + (b_hi - b_lo) * bi as f32 / 40.0;
                let l = loss(a, b);
                if l < best {
                    best = l;
                    best_a = a;
                    best_b = b;
                }
            }
        }
        let (da, db) = ((a_hi - a_lo) / 20.0, (b_hi - b_lo) / 20.0);
        a_lo = (best_a - da).max(1e-3);
        a_hi = best_a + da;
        b_lo = (best_b - db).max(1e-3);
        b_hi = best_b + db;
    }
    (best_a, best_b)
}

fn clip(v: f32) -> f32 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn optimize_layout(
    n: usize,
    edges: &[(usize, usize, f32)],
    a: f32,
    b: f32,
    params: &ProjectionParams,
) -> DenseMatrix {
    let dim = params.n_components;
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut layout = DenseMatrix::zeros(n, dim);
    for i in 0..n {
        for v in layout.row_mut(i) {
            *v = rng.gen_range(-INIT_RANGE..INIT_RANGE);
        }
    }

    let n_epochs = params.epochs_for(n);
    let max_w = edges.iter().map(|e| e.2).fold(0.0f32, f32::max);
    if max_w <= 0.0 {
        return layout;
    }

    // Each directed edge is visited roughly `w / max_w * n_epochs` times.
    let mut directed: Vec<(usize, usize, f32)> = Vec::with_capacity(edges.len() * 2);
    for &(i, j, w) in edges {
        let eps = max_w / w;
        directed.push((i, j, eps));
        directed.push((j, i, eps));
    }
    let mut next_sample: Vec<f32> = directed.iter().map(|e| e.2).collect();

    let mut head = vec![0.0f32; dim];
    let mut tail = vec![0.0f32; dim];

    for epoch in 0..n_epochs {
        let alpha = params.learning_rate * (1.0 - epoch as f32 / n_epochs as f32);
        for (e, &(i, j, eps)) in directed.iter().enumerate() {
            if next_sample[e] > epoch as f32 {
                continue;
            }
            next_sample[e] += eps;

            head.copy_from_slice(layout.row(i));
            tail.copy_from_slice(layout.row(j));
            let d2 = squared_distance(&head, &tail);
            if d2 > 0.0 {
                let coeff = -2.0 * a * b * d2.powf(b - 1.0) / (1.0 + a * d2.powf(b));
                for c in 0..dim {
                    let g = clip(coeff * (head[c] - tail[c])) * alpha;
                    head[c] += g;
                    tail[c] -= g;
                }
                layout.row_mut(i).copy_from_slice(&head);
                layout.row_mut(j).copy_from_slice(&tail);
            }

            for _ in 0..params.negative_sample_rate {
                let k = rng.gen_range(0..n);
                if k == i {
                    continue;
                }
                let other = layout.row(k);
                let d2 = squared_distance(&head, other);
                if d2 <= 0.0 {
                    continue;
                }
                let coeff = 2.0 * b / ((1e-3 + d2) * (1.0 + a * d2.powf(b)));
                for c in 0..dim {
                    head[c] += clip(coeff * (head[c] - other[c])) * alpha;
                }
            }
            layout.row_mut(i).copy_from_slice(&head);
        }
    }
    layout
}
