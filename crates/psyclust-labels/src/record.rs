//! Cluster label records: the unit drafted, reviewed and finalized.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{LabelError, Result};

/// One representative post quoted in a draft.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplePost {
    pub text: String,
    pub valence: Option<f64>,
    pub complexity: Option<f64>,
    pub detected_defenses: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterLabelRecord {
    pub cluster_id: u32,
    /// Null until a drafter or reviewer supplies one.
    pub label: Option<String>,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub structure: String,
    /// Aggregate traits (`avg_<column>` → mean), undefined means as null.
    #[serde(default)]
    pub dominant_traits: BTreeMap<String, Option<f64>>,
    /// Most frequent detected defenses, `(name, count)`; absent when the
    /// features carried none.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub common_defenses: Vec<(String, usize)>,
    #[serde(default)]
    pub sample_posts: Vec<SamplePost>,
}

impl ClusterLabelRecord {
    pub fn new(cluster_id: u32) -> Self {
        Self {
            cluster_id,
            label: None,
            traits: Vec::new(),
            structure: String::new(),
            dominant_traits: BTreeMap::new(),
            common_defenses: Vec::new(),
            sample_posts: Vec::new(),
        }
    }

    /// Decode a stored record, naming it `record` in any error.
    ///
    /// A missing or non-integer `cluster_id` is the one fatal defect; optional
    /// fields default when absent.
    pub fn from_value(record: &str, value: serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| LabelError::malformed(record, "not a JSON object"))?;
        match object.get("cluster_id") {
            None | Some(serde_json::Value::Null) => {
                return Err(LabelError::malformed(record, "missing `cluster_id`"))
            }
            Some(id) if id.as_u64().map_or(true, |v| v > u64::from(u32::MAX)) => {
                return Err(LabelError::malformed(
                    record,
                    format!("`cluster_id` must be a non-negative integer, got {id}"),
                ))
            }
            Some(_) => {}
        }
        serde_json::from_value(value).map_err(|e| LabelError::malformed(record, e.to_string()))
    }

    pub fn from_slice(record: &str, bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(LabelError::malformed(record, "empty file"));
        }
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| LabelError::malformed(record, e.to_string()))?;
        Self::from_value(record, value)
    }

    pub fn to_pretty_json(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_label_and_absent_fields_are_accepted() {
        let record = ClusterLabelRecord::from_value(
            "cluster_2_label_draft.json",
            json!({"cluster_id": 2, "label": null}),
        )
        .unwrap();
        assert_eq!(record.cluster_id, 2);
        assert!(record.label.is_none());
        assert!(record.traits.is_empty());
        assert!(record.structure.is_empty());
    }

    #[test]
    fn missing_cluster_id_is_malformed() {
        let err = ClusterLabelRecord::from_value("x.json", json!({"label": "Hollow Mirror"}))
            .unwrap_err();
        assert!(matches!(err, LabelError::MalformedRecord { ref reason, .. } if reason.contains("cluster_id")));
        assert!(err.is_recoverable());

        let err = ClusterLabelRecord::from_value("x.json", json!({"cluster_id": -1})).unwrap_err();
        assert!(err.to_string().contains("non-negative integer"));
    }

    #[test]
    fn empty_file_is_malformed() {
        let err = ClusterLabelRecord::from_slice("blank.json", b"  \n").unwrap_err();
        assert!(err.to_string().contains("empty file"));
    }

    #[test]
    fn undefined_trait_means_serialize_as_null() {
        let mut record = ClusterLabelRecord::new(0);
        record.dominant_traits.insert("avg_word_count".into(), None);
        let text = String::from_utf8(record.to_pretty_json().unwrap()).unwrap();
        assert!(text.contains("\"avg_word_count\": null"));
        assert!(text.contains("\"label\": null"));
    }
}
