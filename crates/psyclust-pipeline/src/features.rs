//! Feature records supplied by external extractors.
//!
//! The pipeline treats feature values as opaque payload: only the `id` key is
//! interpreted. Text columns (post bodies) ride along so the labeling stage can
//! quote representative excerpts.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::ledger::PostId;

/// Column name carrying the post identifier in raw feature records.
pub const ID_COLUMN: &str = "id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
    Missing,
}

impl FeatureValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FeatureValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Missing, or a number that is NaN/infinite.
    pub fn is_undefined(&self) -> bool {
        match self {
            FeatureValue::Missing => true,
            FeatureValue::Number(v) => !v.is_finite(),
            FeatureValue::Text(_) => false,
        }
    }

    fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map_or(FeatureValue::Missing, FeatureValue::Number),
            serde_json::Value::String(s) => FeatureValue::Text(s.clone()),
            serde_json::Value::Bool(b) => FeatureValue::Number(if *b { 1.0 } else { 0.0 }),
            serde_json::Value::Null | serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                FeatureValue::Missing
            }
        }
    }
}

/// Column-wise feature table, rows in the order they were produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    ids: Vec<PostId>,
    columns: Vec<String>,
    rows: Vec<Vec<FeatureValue>>,
}

impl FeatureTable {
    pub const ARTIFACT: &'static str = "features";

    pub fn new(ids: Vec<PostId>, columns: Vec<String>, rows: Vec<Vec<FeatureValue>>) -> Result<Self> {
        if ids.len() != rows.len() {
            return Err(PipelineError::invalid_parameter(format!(
                "feature table has {} ids but {} rows",
                ids.len(),
                rows.len()
            )));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(PipelineError::invalid_parameter(format!(
                "feature row {i} has {} values, expected {}",
                row.len(),
                columns.len()
            )));
        }
        if columns.iter().any(|c| c == ID_COLUMN) {
            return Err(PipelineError::invalid_parameter(
                "`id` is the row key, not a feature column",
            ));
        }
        Ok(Self { ids, columns, rows })
    }

    /// Build from raw JSON objects, each holding an `id` plus feature fields.
    ///
    /// Columns are the union of keys in first-seen order; a key absent from a
    /// row becomes [`FeatureValue::Missing`] for the validator to catch.
    pub fn from_records(records: &[serde_json::Map<String, serde_json::Value>]) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if key != ID_COLUMN && !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut ids = Vec::with_capacity(records.len());
        let mut rows = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let id = record.get(ID_COLUMN).ok_or_else(|| PipelineError::Artifact {
                slot: Self::ARTIFACT.to_string(),
                message: format!("record {i} has no `{ID_COLUMN}` key"),
            })?;
            let id: PostId = serde_json::from_value(id.clone()).map_err(|e| PipelineError::Artifact {
                slot: Self::ARTIFACT.to_string(),
                message: format!("record {i} has an unusable `{ID_COLUMN}`: {e}"),
            })?;
            ids.push(id);
            rows.push(
                columns
                    .iter()
                    .map(|c| record.get(c).map_or(FeatureValue::Missing, FeatureValue::from_json))
                    .collect(),
            );
        }
        Self::new(ids, columns, rows)
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

    pub fn row(&self, i: usize) -> &[FeatureValue] {
        &self.rows[i]
    }

    pub fn rows(&self) -> &[Vec<FeatureValue>] {
        &self.rows
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
