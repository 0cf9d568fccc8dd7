//! Cluster engine: HDBSCAN over a projection (or raw embeddings).
//!
//! ```text
//! points ─► core distances ─► mutual-reachability MST ─► single linkage
//!                                                            │
//!        assignments ◄─ selection (EOM | leaf) ◄─ condensed tree (min_cluster_size)
//! ```
//!
//! The number of clusters is not a parameter: it falls out of the density
//! structure, and points in no dense region are reported as [`Assignment::Noise`]
//! instead of being forced into the nearest group.
//!
//! Confidence convention: members carry the HDBSCAN membership probability in
//! `[0, 1]`; noise carries no confidence and reports `0.0` wherever a flat
//! number is required (legacy `-1` label files, merged tables).

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::ledger::PostId;
use crate::matrix::{DenseMatrix, Metric};

/// Lambda (`1 / distance`) cap for coincident points.
const MAX_LAMBDA: f64 = 1e12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSelectionMethod {
    /// Excess of mass: keep the most persistent clusters in the hierarchy.
    #[default]
    ExcessOfMass,
    /// Leaf clusters only; more, smaller groups.
    Leaf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdbscanParams {
    pub min_cluster_size: usize,
    /// Neighbour count for core distances; defaults to `min_cluster_size`.
    pub min_samples: Option<usize>,
    pub metric: Metric,
    pub selection: ClusterSelectionMethod,
    pub allow_single_cluster: bool,
}

impl Default for HdbscanParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            min_samples: None,
            metric: Metric::Euclidean,
            selection: ClusterSelectionMethod::ExcessOfMass,
            allow_single_cluster: false,
        }
    }
}

impl HdbscanParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_cluster_size < 2 {
            return Err(PipelineError::invalid_parameter(format!(
                "min_cluster_size must be >= 2, got {}",
                self.min_cluster_size
            )));
        }
        if self.min_samples == Some(0) {
            return Err(PipelineError::invalid_parameter(
                "min_samples must be >= 1",
            ));
        }
        Ok(())
    }

    pub fn effective_min_samples(&self) -> usize {
        self.min_samples.unwrap_or(self.min_cluster_size)
    }
}

/// Outcome for one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assignment {
    Member { cluster_id: u32, confidence: f64 },
    Noise,
}

impl Assignment {
    /// Sentinel used for noise in flat label files.
    pub const NOISE_LABEL: i64 = -1;

    pub fn cluster_id(&self) -> Option<u32> {
        match self {
            Assignment::Member { cluster_id, .. } => Some(*cluster_id),
            Assignment::Noise => None,
        }
    }

    pub fn is_noise(&self) -> bool {
        matches!(self, Assignment::Noise)
    }

    /// Membership confidence; `0.0` for noise.
    pub fn confidence(&self) -> f64 {
        match self {
            Assignment::Member { confidence, .. } => *confidence,
            Assignment::Noise => 0.0,
        }
    }

    pub fn legacy_label(&self) -> i64 {
        self.cluster_id()
            .map_or(Self::NOISE_LABEL, i64::from)
    }

    /// Decode a flat `(label, confidence)` pair. Any non-zero confidence on a
    /// noise row is dropped.
    pub fn from_legacy(label: i64, confidence: f64) -> Result<Self> {
        match label {
            Self::NOISE_LABEL => Ok(Assignment::Noise),
            l if l >= 0 && l <= i64::from(u32::MAX) => Ok(Assignment::Member {
                cluster_id: l as u32,
                confidence,
            }),
            other => Err(PipelineError::invalid_parameter(format!(
                "cluster label {other} is neither a cluster id nor the noise sentinel"
            ))),
        }
    }
}

/// Cluster sizes including the noise bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDistribution {
    pub noise: usize,
    pub clusters: BTreeMap<u32, usize>,
}

impl ClusterDistribution {
    pub fn total(&self) -> usize {
        self.noise + self.clusters.values().sum::<usize>()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl std::fmt::Display for ClusterDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "cluster {:>4} (noise): {}", Assignment::NOISE_LABEL, self.noise)?;
        for (id, count) in &self.clusters {
            writeln!(f, "cluster {id:>4}: {count}")?;
        }
        Ok(())
    }
}

/// Per-id cluster assignments and GLOSH outlier scores, stored column-wise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTable {
    ids: Vec<PostId>,
    assignments: Vec<Assignment>,
    outlier_scores: Vec<f64>,
}

impl ClusterTable {
    pub const ARTIFACT: &'static str = "clusters";

    pub fn new(
        ids: Vec<PostId>,
        assignments: Vec<Assignment>,
        outlier_scores: Vec<f64>,
    ) -> Result<Self> {
        if ids.len() != assignments.len() || ids.len() != outlier_scores.len() {
            return Err(PipelineError::invalid_parameter(format!(
                "cluster table columns differ in length: ids={}, assignments={}, outlier_scores={}",
                ids.len(),
                assignments.len(),
                outlier_scores.len()
            )));
        }
        Ok(Self {
            ids,
            assignments,
            outlier_scores,
        })
    }

    /// Build from flat label/confidence columns (`-1` = noise).
    pub fn from_legacy(ids: Vec<PostId>, labels: &[i64], confidences: &[f64]) -> Result<Self> {
        if labels.len() != confidences.len() {
            return Err(PipelineError::invalid_parameter(format!(
                "{} labels but {} confidences",
                labels.len(),
                confidences.len()
            )));
        }
        let assignments = labels
            .iter()
            .zip(confidences)
            .map(|(&l, &c)| Assignment::from_legacy(l, c))
            .collect::<Result<Vec<_>>>()?;
        let scores = vec![0.0; assignments.len()];
        Self::new(ids, assignments, scores)
    }

    pub fn from_result(ids: Vec<PostId>, result: HdbscanResult) -> Result<Self> {
        Self::new(ids, result.assignments, result.outlier_scores)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[PostId] {
        &self.ids
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn outlier_scores(&self) -> &[f64] {
        &self.outlier_scores
    }

    pub fn legacy_labels(&self) -> Vec<i64> {
        self.assignments.iter().map(Assignment::legacy_label).collect()
    }

    /// Sorted distinct non-noise cluster ids.
    pub fn cluster_ids(&self) -> Vec<u32> {
        self.distribution().clusters.into_keys().collect()
    }

    /// Row indices of the members of `cluster_id`, in ledger order.
    pub fn members(&self, cluster_id: u32) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, a)| a.cluster_id() == Some(cluster_id))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn distribution(&self) -> ClusterDistribution {
        let mut dist = ClusterDistribution::default();
        for a in &self.assignments {
            match a.cluster_id() {
                Some(id) => *dist.clusters.entry(id).or_insert(0) += 1,
                None => dist.noise += 1,
            }
        }
        dist
    }

    /// First row whose confidence or outlier score is undefined: non-finite or
    /// outside `[0, 1]`.
    pub fn first_undefined_score(&self) -> Option<(usize, &'static str)> {
        let bad = |v: f64| !v.is_finite() || !(0.0..=1.0).contains(&v);
        for (row, (a, s)) in self.assignments.iter().zip(&self.outlier_scores).enumerate() {
            if bad(a.confidence()) {
                return Some((row, "confidence"));
            }
            if bad(*s) {
                return Some((row, "outlier_score"));
            }
        }
        None
    }
}

/// Raw engine output, one entry per input row.
#[derive(Debug, Clone, PartialEq)]
pub struct HdbscanResult {
    pub assignments: Vec<Assignment>,
    pub outlier_scores: Vec<f64>,
}

/// Partition `points` into density-based clusters.
pub fn hdbscan(points: &DenseMatrix, params: &HdbscanParams) -> Result<HdbscanResult> {
    let n = points.nrows();
    if n == 0 {
        return Err(PipelineError::EmptyInput { stage: "clustering" });
    }
    params.validate()?;
    if let Some((row, col)) = points.first_non_finite() {
        return Err(PipelineError::invalid_parameter(format!(
            "clustering input holds a non-finite value at row {row}, column {col}"
        )));
    }
    if n == 1 {
        return Ok(HdbscanResult {
            assignments: vec![Assignment::Noise],
            outlier_scores: vec![0.0],
        });
    }

    let distances = points.pairwise_distances(params.metric);
    let core = core_distances(&distances, n, params.effective_min_samples());
    let mst = mutual_reachability_mst(&distances, &core, n);
    let linkage = single_linkage(mst, n);
    let tree = CondensedTree::build(&linkage, n, params.min_cluster_size);
    let selected = tree.select(params);
    let result = tree.label(&selected);

    tracing::debug!(
        rows = n,
        clusters = selected.iter().filter(|s| **s).count(),
        noise = result.assignments.iter().filter(|a| a.is_noise()).count(),
        "hdbscan complete"
    );
    Ok(result)
}

/// Distance to the `min_samples`-th nearest point, counting the point itself.
fn core_distances(distances: &[f32], n: usize, min_samples: usize) -> Vec<f64> {
    let k = min_samples.saturating_sub(1).min(n - 1);
    (0..n)
        .into_par_iter()
        .map(|i| {
            let mut row: Vec<f32> = distances[i * n..(i + 1) * n].to_vec();
            row.sort_by(f32::total_cmp);
            f64::from(row[k])
        })
        .collect()
}

/// Prim's algorithm over the dense mutual-reachability graph. Returns edges
/// sorted by weight; ties keep discovery order.
fn mutual_reachability_mst(distances: &[f32], core: &[f64], n: usize) -> Vec<(usize, usize, f64)> {
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let d = f64::from(distances[current * n + j]);
            let mr = d.max(core[current]).max(core[j]);
            if mr < best[j] {
                best[j] = mr;
                from[j] = current;
            }
        }
        let mut next = usize::MAX;
        for j in 0..n {
            if !in_tree[j] && (next == usize::MAX || best[j] < best[next]) {
                next = j;
            }
        }
        in_tree[next] = true;
        edges.push((from[next], next, best[next]));
        current = next;
    }

    edges.sort_by(|a, b| a.2.total_cmp(&b.2));
    edges
}

#[derive(Debug, Clone, Copy)]
struct LinkageRow {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// Agglomerate MST edges into a binary hierarchy; node `n + i` is row `i`.
fn single_linkage(mst: Vec<(usize, usize, f64)>, n: usize) -> Vec<LinkageRow> {
    let total = 2 * n - 1;
    let mut parent: Vec<usize> = (0..total).collect();
    let mut size = vec![1usize; total];

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        while parent[x] != root {
            let next = parent[x];
            parent[x] = root;
            x = next;
        }
        root
    }

    let mut rows = Vec::with_capacity(n - 1);
    for (a, b, distance) in mst {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        let node = n + rows.len();
        size[node] = size[ra] + size[rb];
        parent[ra] = node;
        parent[rb] = node;
        rows.push(LinkageRow {
            left: ra,
            right: rb,
            distance,
            size: size[node],
        });
    }
    rows
}

#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    size: usize,
}

/// Hierarchy with clusters smaller than `min_cluster_size` collapsed into
/// point fall-outs. Cluster labels start at `n` (the root); a child's label is
/// always larger than its parent's.
struct CondensedTree {
    n: usize,
    edges: Vec<CondensedEdge>,
    cluster_count: usize,
}

impl CondensedTree {
    fn build(linkage: &[LinkageRow], n: usize, min_cluster_size: usize) -> Self {
        let root = 2 * n - 2;
        let node_size = |x: usize| if x < n { 1 } else { linkage[x - n].size };
        let children = |x: usize| {
            if x < n {
                None
            } else {
                Some((linkage[x - n].left, linkage[x - n].right))
            }
        };
        let descendants = |start: usize| {
            let mut out = vec![start];
            let mut i = 0;
            while i < out.len() {
                if let Some((l, r)) = children(out[i]) {
                    out.push(l);
                    out.push(r);
                }
                i += 1;
            }
            out
        };

        let mut relabel = vec![0usize; 2 * n - 1];
        relabel[root] = n;
        let mut next_label = n + 1;
        let mut ignore = vec![false; 2 * n - 1];
        let mut edges = Vec::new();

        for node in descendants(root) {
            if node < n || ignore[node] {
                continue;
            }
            let row = linkage[node - n];
            let lambda = if row.distance > 0.0 {
                (1.0 / row.distance).min(MAX_LAMBDA)
            } else {
                MAX_LAMBDA
            };
            let parent = relabel[node];
            let (left, right) = (row.left, row.right);
            let (lc, rc) = (node_size(left), node_size(right));

            let fall_out = |side: usize, edges: &mut Vec<CondensedEdge>, ignore: &mut [bool]| {
                for sub in descendants(side) {
                    if sub < n {
                        edges.push(CondensedEdge {
                            parent,
                            child: sub,
                            lambda,
                            size: 1,
                        });
                    }
                    ignore[sub] = true;
                }
            };

            match (lc >= min_cluster_size, rc >= min_cluster_size) {
                (true, true) => {
                    for (side, count) in [(left, lc), (right, rc)] {
                        relabel[side] = next_label;
                        edges.push(CondensedEdge {
                            parent,
                            child: next_label,
                            lambda,
                            size: count,
                        });
                        next_label += 1;
                    }
                }
                (false, false) => {
                    fall_out(left, &mut edges, &mut ignore);
                    fall_out(right, &mut edges, &mut ignore);
                }
                (false, true) => {
                    relabel[right] = parent;
                    fall_out(left, &mut edges, &mut ignore);
                }
                (true, false) => {
                    relabel[left] = parent;
                    fall_out(right, &mut edges, &mut ignore);
                }
            }
        }

        Self {
            n,
            edges,
            cluster_count: next_label - n,
        }
    }

    /// Parent cluster index (0-based, root = 0) of each cluster index.
    fn cluster_parents(&self) -> Vec<Option<usize>> {
        let mut parents = vec![None; self.cluster_count];
        for e in self.edges.iter().filter(|e| e.child >= self.n) {
            parents[e.child - self.n] = Some(e.parent - self.n);
        }
        parents
    }

    fn cluster_children(&self) -> Vec<Vec<usize>> {
        let mut children = vec![Vec::new(); self.cluster_count];
        for e in self.edges.iter().filter(|e| e.child >= self.n) {
            children[e.parent - self.n].push(e.child - self.n);
        }
        children
    }

    fn stabilities(&self) -> Vec<f64> {
        let mut birth = vec![0.0f64; self.cluster_count];
        for e in self.edges.iter().filter(|e| e.child >= self.n) {
            birth[e.child - self.n] = e.lambda;
        }
        let mut stability = vec![0.0f64; self.cluster_count];
        for e in &self.edges {
            let p = e.parent - self.n;
            stability[p] += (e.lambda - birth[p]) * e.size as f64;
        }
        stability
    }

    /// Largest lambda among each cluster's direct children.
    fn direct_deaths(&self) -> Vec<f64> {
        let mut deaths = vec![0.0f64; self.cluster_count];
        for e in &self.edges {
            let p = e.parent - self.n;
            deaths[p] = deaths[p].max(e.lambda);
        }
        deaths
    }

    fn select(&self, params: &HdbscanParams) -> Vec<bool> {
        let children = self.cluster_children();
        let mut selected = vec![false; self.cluster_count];

        match params.selection {
            ClusterSelectionMethod::Leaf => {
                for c in 0..self.cluster_count {
                    if children[c].is_empty() && (c != 0 || params.allow_single_cluster) {
                        selected[c] = true;
                    }
                }
            }
            ClusterSelectionMethod::ExcessOfMass => {
                let mut stability = self.stabilities();
                selected.iter_mut().for_each(|s| *s = true);
                selected[0] = params.allow_single_cluster;

                for c in (0..self.cluster_count).rev() {
                    if c == 0 && !params.allow_single_cluster {
                        continue;
                    }
                    let subtree: f64 = children[c].iter().map(|&ch| stability[ch]).sum();
                    if subtree > stability[c] {
                        selected[c] = false;
                        stability[c] = subtree;
                    } else {
                        let mut stack = children[c].clone();
                        while let Some(d) = stack.pop() {
                            selected[d] = false;
                            stack.extend(children[d].iter().copied());
                        }
                    }
                }
            }
        }
        selected
    }

    fn label(&self, selected: &[bool]) -> HdbscanResult {
        let n = self.n;
        let parents = self.cluster_parents();
        let deaths = self.direct_deaths();

        // Deaths propagated to ancestors, for GLOSH.
        let mut subtree_deaths = deaths.clone();
        for c in (1..self.cluster_count).rev() {
            if let Some(p) = parents[c] {
                subtree_deaths[p] = subtree_deaths[p].max(subtree_deaths[c]);
            }
        }

        let mut dense_ids = vec![None; self.cluster_count];
        let mut next_id = 0u32;
        for (c, _) in selected.iter().enumerate().filter(|(_, s)| **s) {
            dense_ids[c] = Some(next_id);
            next_id += 1;
        }

        let mut point_parent = vec![0usize; n];
        let mut point_lambda = vec![0.0f64; n];
        for e in self.edges.iter().filter(|e| e.child < n) {
            point_parent[e.child] = e.parent - n;
            point_lambda[e.child] = e.lambda;
        }

        let mut assignments = Vec::with_capacity(n);
        let mut outlier_scores = Vec::with_capacity(n);
        for p in 0..n {
            let lambda = point_lambda[p];

            let mut c = point_parent[p];
            let owner = loop {
                if selected[c] {
                    break Some(c);
                }
                match parents[c] {
                    Some(up) => c = up,
                    None => break None,
                }
            };

            assignments.push(match owner {
                Some(c) => {
                    let max_lambda = deaths[c];
                    let confidence = if max_lambda <= 0.0 {
                        1.0
                    } else {
                        lambda.min(max_lambda) / max_lambda
                    };
                    Assignment::Member {
                        cluster_id: dense_ids[c].unwrap_or_default(),
                        confidence: confidence.clamp(0.0, 1.0),
                    }
                }
                None => Assignment::Noise,
            });

            let max_lambda = subtree_deaths[point_parent[p]];
            let score = if max_lambda <= 0.0 {
                0.0
            } else {
                (max_lambda - lambda) / max_lambda
            };
            outlier_scores.push(score.clamp(0.0, 1.0));
        }

        HdbscanResult {
            assignments,
            outlier_scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(cx: f32, cy: f32, count: usize) -> Vec<Vec<f32>> {
        (0..count)
            .map(|i| {
                let t = i as f32 * 0.7;
                vec![cx + 0.05 * t.cos() * (1.0 + i as f32 * 0.1), cy + 0.05 * t.sin()]
            })
            .collect()
    }

    fn three_groups_and_an_outlier() -> DenseMatrix {
        let mut rows = blob(0.0, 0.0, 8);
        rows.extend(blob(5.0, 5.0, 8));
        rows.extend(blob(-5.0, 5.0, 8));
        rows.push(vec![20.0, -20.0]);
        DenseMatrix::from_rows(rows).unwrap()
    }

    fn params(min_cluster_size: usize) -> HdbscanParams {
        HdbscanParams {
            min_cluster_size,
            ..HdbscanParams::default()
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = hdbscan(&DenseMatrix::zeros(0, 2), &params(2)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput { .. }));
    }

    #[test]
    fn finds_separated_groups_and_flags_the_outlier() {
        let points = three_groups_and_an_outlier();
        let result = hdbscan(&points, &params(4)).unwrap();
        assert_eq!(result.assignments.len(), 25);

        let ids: Vec<Option<u32>> = result.assignments.iter().map(Assignment::cluster_id).collect();
        let first = ids[0].expect("first blob clustered");
        assert!(ids[..8].iter().all(|c| *c == Some(first)));
        let second = ids[8].expect("second blob clustered");
        assert!(ids[8..16].iter().all(|c| *c == Some(second)));
        let third = ids[16].expect("third blob clustered");
        assert!(ids[16..24].iter().all(|c| *c == Some(third)));
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(ids[24], None, "far point is noise");

        let mut distinct: Vec<u32> = ids.iter().flatten().copied().collect();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct, vec![0, 1, 2], "cluster ids are dense");
    }

    #[test]
    fn confidences_follow_the_noise_convention() {
        let result = hdbscan(&three_groups_and_an_outlier(), &params(4)).unwrap();
        for (a, s) in result.assignments.iter().zip(&result.outlier_scores) {
            match a {
                Assignment::Member { confidence, .. } => {
                    assert!(confidence.is_finite());
                    assert!((0.0..=1.0).contains(confidence));
                }
                Assignment::Noise => assert_eq!(a.confidence(), 0.0),
            }
            assert!((0.0..=1.0).contains(s));
        }
        assert!(result
            .assignments
            .iter()
            .any(|a| (a.confidence() - 1.0).abs() < 1e-12));
    }

    #[test]
    fn too_few_points_are_all_noise() {
        let points = DenseMatrix::from_rows(blob(0.0, 0.0, 3)).unwrap();
        let result = hdbscan(&points, &params(5)).unwrap();
        assert!(result.assignments.iter().all(Assignment::is_noise));

        let single = DenseMatrix::from_rows(vec![vec![1.0, 1.0]]).unwrap();
        let result = hdbscan(&single, &params(2)).unwrap();
        assert_eq!(result.assignments, vec![Assignment::Noise]);
    }

    #[test]
    fn deterministic_for_fixed_input() {
        let points = three_groups_and_an_outlier();
        let a = hdbscan(&points, &params(3)).unwrap();
        let b = hdbscan(&points, &params(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn coincident_points_stay_finite() {
        let mut rows = vec![vec![1.0, 1.0]; 5];
        rows.extend(vec![vec![9.0, 9.0]; 5]);
        let points = DenseMatrix::from_rows(rows).unwrap();
        let result = hdbscan(&points, &params(3)).unwrap();
        assert!(result.assignments.iter().all(|a| a.confidence().is_finite()));
        assert_eq!(result.assignments[0].cluster_id(), result.assignments[4].cluster_id());
        assert_ne!(result.assignments[0].cluster_id(), result.assignments[5].cluster_id());
    }

    #[test]
    fn leaf_selection_never_picks_fewer_clusters_than_eom() {
        let points = three_groups_and_an_outlier();
        let eom = hdbscan(&points, &params(3)).unwrap();
        let leaf = hdbscan(
            &points,
            &HdbscanParams {
                selection: ClusterSelectionMethod::Leaf,
                ..params(3)
            },
        )
        .unwrap();
        let count = |r: &HdbscanResult| {
            let mut ids: Vec<u32> = r.assignments.iter().filter_map(Assignment::cluster_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        };
        assert!(count(&leaf) >= count(&eom));
    }

    #[test]
    fn legacy_labels_roundtrip_through_tagged_assignments() {
        let ids: Vec<PostId> = ["a", "b", "c", "d"].into_iter().map(PostId::from).collect();
        let table =
            ClusterTable::from_legacy(ids, &[0, 0, 1, -1], &[0.9, 0.8, 0.7, 0.0]).unwrap();
        assert_eq!(table.legacy_labels(), vec![0, 0, 1, -1]);
        assert_eq!(table.assignments()[3], Assignment::Noise);
        assert_eq!(table.members(0), vec![0, 1]);
        assert_eq!(table.cluster_ids(), vec![0, 1]);

        let dist = table.distribution();
        assert_eq!(dist.noise, 1);
        assert_eq!(dist.total(), 4);
        assert!(dist.to_string().contains("(noise): 1"));

        assert!(Assignment::from_legacy(-2, 0.0).is_err());
    }
}
