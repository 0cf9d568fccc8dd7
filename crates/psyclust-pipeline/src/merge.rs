//! Merge features, cluster assignments and embeddings into one table.
//!
//! The join key is the identity ledger. Inputs are proven aligned before any
//! row is zipped; a join that would need reordering or dropping rows is an
//! integrity failure, never a best-effort match.
//!
//! Column layout: `<feature columns…> | cluster | emb_0 … emb_{w-1}`.

use serde::{Deserialize, Serialize};

use crate::cluster::{Assignment, ClusterTable};
use crate::embedding::EmbeddingSet;
use crate::error::{PipelineError, Result};
use crate::features::{FeatureTable, FeatureValue};
use crate::ledger::{IdentityLedger, PostId};
use crate::validate::ConsistencyValidator;

pub const CLUSTER_COLUMN: &str = "cluster";
pub const EMBEDDING_PREFIX: &str = "emb_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedTable {
    ids: Vec<PostId>,
    columns: Vec<String>,
    rows: Vec<Vec<FeatureValue>>,
    feature_width: usize,
    embedding_width: usize,
}

impl MergedTable {
    pub const ARTIFACT: &'static str = "merged";

    /// Column count a merge of these inputs must produce.
    pub fn expected_columns(feature_width: usize, embedding_width: usize) -> usize {
        feature_width + 1 + embedding_width
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

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn feature_width(&self) -> usize {
        self.feature_width
    }

    pub fn embedding_width(&self) -> usize {
        self.embedding_width
    }

    pub fn row(&self, i: usize) -> &[FeatureValue] {
        &self.rows[i]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&FeatureValue> {
        self.column_index(column).map(|c| &self.rows[row][c])
    }

    pub fn number(&self, row: usize, column: &str) -> Option<f64> {
        self.value(row, column).and_then(FeatureValue::as_number)
    }

    pub fn text(&self, row: usize, column: &str) -> Option<&str> {
        self.value(row, column).and_then(FeatureValue::as_text)
    }

    /// Cluster id of `row`; `None` for noise.
    pub fn cluster_of(&self, row: usize) -> Option<u32> {
        match self.rows[row][self.feature_width] {
            FeatureValue::Number(v) if v >= 0.0 && v.fract() == 0.0 => Some(v as u32),
            _ => None,
        }
    }

    /// Sorted distinct non-noise cluster ids.
    pub fn cluster_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = (0..self.len()).filter_map(|r| self.cluster_of(r)).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Member rows of `cluster_id`, in ledger order.
    pub fn members(&self, cluster_id: u32) -> Vec<usize> {
        (0..self.len())
            .filter(|&r| self.cluster_of(r) == Some(cluster_id))
            .collect()
    }

    /// First `(row, column)` holding an undefined value.
    pub fn first_undefined(&self) -> Option<(usize, &str)> {
        self.rows.iter().enumerate().find_map(|(r, row)| {
            row.iter()
                .position(FeatureValue::is_undefined)
                .map(|c| (r, self.columns[c].as_str()))
        })
    }
}

/// Join the three row-aligned inputs on the ledger.
///
/// The inputs are first run through the consistency validator, so a
/// reordered or truncated artifact is reported by name before any row is
/// combined.
pub fn merge(
    ledger: &IdentityLedger,
    features: &FeatureTable,
    clusters: &ClusterTable,
    embeddings: &EmbeddingSet,
) -> Result<MergedTable> {
    ConsistencyValidator::new(ledger)
        .require(embeddings)
        .require(features)
        .require(clusters)
        .validate()?;

    let feature_width = features.columns().len();
    let embedding_width = embeddings.width();
    if let Some(clash) = features
        .columns()
        .iter()
        .find(|c| *c == CLUSTER_COLUMN || c.starts_with(EMBEDDING_PREFIX))
    {
        return Err(PipelineError::invalid_parameter(format!(
            "feature column `{clash}` collides with a merged column name"
        )));
    }

    let mut columns = features.columns().to_vec();
    columns.push(CLUSTER_COLUMN.to_string());
    columns.extend((0..embedding_width).map(|i| format!("{EMBEDDING_PREFIX}{i}")));

    let rows = (0..ledger.len())
        .map(|r| {
            let mut row = Vec::with_capacity(columns.len());
            row.extend_from_slice(features.row(r));
            row.push(cluster_cell(&clusters.assignments()[r]));
            row.extend(
                embeddings
                    .vectors()
                    .row(r)
                    .iter()
                    .map(|&v| FeatureValue::Number(f64::from(v))),
            );
            row
        })
        .collect();

    let merged = MergedTable {
        ids: ledger.ids().to_vec(),
        columns,
        rows,
        feature_width,
        embedding_width,
    };
    tracing::info!(
        rows = merged.len(),
        columns = merged.columns().len(),
        features = feature_width,
        embedding_width,
        "merged table built"
    );
    Ok(merged)
}

fn cluster_cell(assignment: &Assignment) -> FeatureValue {
    FeatureValue::Number(assignment.legacy_label() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntegrityCheck;

    fn ids(raw: &[&str]) -> Vec<PostId> {
        raw.iter().map(|s| PostId::from(*s)).collect()
    }

    fn inputs(cluster_order: &[&str]) -> (IdentityLedger, FeatureTable, ClusterTable, EmbeddingSet) {
        let order = ["a", "b", "c", "d"];
        let ledger = IdentityLedger::new(ids(&order)).unwrap();
        let features = FeatureTable::new(
            ids(&order),
            vec!["valence".into()],
            vec![
                vec![FeatureValue::Number(0.1)],
                vec![FeatureValue::Number(-0.4)],
                vec![FeatureValue::Number(0.3)],
                vec![FeatureValue::Number(0.0)],
            ],
        )
        .unwrap();
        let clusters = ClusterTable::from_legacy(
            ids(cluster_order),
            &[0, 0, 1, -1],
            &[0.9, 0.8, 0.7, 0.0],
        )
        .unwrap();
        let embeddings = EmbeddingSet::from_rows(
            ids(&order),
            (0..4).map(|i| vec![i as f32, 1.0, 0.5]).collect(),
        )
        .unwrap();
        (ledger, features, clusters, embeddings)
    }

    #[test]
    fn merged_layout_is_features_cluster_embeddings() {
        let (ledger, f, c, e) = inputs(&["a", "b", "c", "d"]);
        let merged = merge(&ledger, &f, &c, &e).unwrap();
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.columns(), &["valence", "cluster", "emb_0", "emb_1", "emb_2"]);
        assert_eq!(merged.columns().len(), MergedTable::expected_columns(1, 3));
        assert_eq!(merged.cluster_of(3), None);
        assert_eq!(merged.cluster_ids(), vec![0, 1]);
        assert_eq!(merged.members(0), vec![0, 1]);
        assert_eq!(merged.number(1, "valence"), Some(-0.4));
        assert_eq!(merged.number(2, "emb_0"), Some(2.0));
        assert!(merged.first_undefined().is_none());
    }

    #[test]
    fn misaligned_clusters_are_rejected_before_zipping() {
        let (ledger, f, c, e) = inputs(&["b", "a", "c", "d"]);
        let err = merge(&ledger, &f, &c, &e).unwrap_err();
        let integrity = err.integrity().unwrap();
        assert_eq!(integrity.check, IntegrityCheck::IdentifierAlignment);
        assert!(integrity.names("clusters"));
    }

    #[test]
    fn colliding_feature_name_is_rejected() {
        let (ledger, _, c, e) = inputs(&["a", "b", "c", "d"]);
        let f = FeatureTable::new(
            ids(&["a", "b", "c", "d"]),
            vec!["cluster".into()],
            (0..4).map(|_| vec![FeatureValue::Number(1.0)]).collect(),
        )
        .unwrap();
        assert!(matches!(
            merge(&ledger, &f, &c, &e),
            Err(PipelineError::InvalidParameter(_))
        ));
    }
}
