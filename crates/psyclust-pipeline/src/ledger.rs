//! Identity ledger: the canonical ordered list of post identifiers.
//!
//! Every artifact keyed by post id must carry exactly these ids, in exactly
//! this order. The ledger is the reference the validator compares against.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{IntegrityCheck, PipelineIntegrityError};

/// A post identifier. Integer ids from upstream producers are normalized to
/// their decimal string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PostId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => PostId(s),
            Raw::Int(i) => PostId(i.to_string()),
        })
    }
}

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(value: &str) -> Self {
        PostId(value.to_string())
    }
}

impl From<String> for PostId {
    fn from(value: String) -> Self {
        PostId(value)
    }
}

impl From<i64> for PostId {
    fn from(value: i64) -> Self {
        PostId(value.to_string())
    }
}

/// Ordered, duplicate-free identifier set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityLedger {
    ids: Vec<PostId>,
    positions: HashMap<PostId, usize>,
}

impl IdentityLedger {
    /// Artifact name used in integrity reports.
    pub const ARTIFACT: &'static str = "ids";

    pub fn new(ids: Vec<PostId>) -> Result<Self, PipelineIntegrityError> {
        let mut positions = HashMap::with_capacity(ids.len());
        for (row, id) in ids.iter().enumerate() {
            if let Some(first) = positions.insert(id.clone(), row) {
                return Err(PipelineIntegrityError::new(
                    IntegrityCheck::IdentifierAlignment,
                    [Self::ARTIFACT],
                    "unique identifiers",
                    format!("id `{id}` repeated at rows {first} and {row}"),
                ));
            }
        }
        Ok(Self { ids, positions })
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

    pub fn iter(&self) -> impl Iterator<Item = &PostId> {
        self.ids.iter()
    }

    pub fn position(&self, id: &PostId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn contains(&self, id: &PostId) -> bool {
        self.positions.contains_key(id)
    }

    /// Check that `other` lists the ledger's ids in ledger order.
    ///
    /// Counts are compared first; then the first row whose id differs is
    /// reported, distinguishing a foreign id from a reordered one.
    pub fn verify_aligned(
        &self,
        artifact: &str,
        other: &[PostId],
    ) -> Result<(), PipelineIntegrityError> {
        if other.len() != self.ids.len() {
            return Err(PipelineIntegrityError::new(
                IntegrityCheck::RowCount,
                [Self::ARTIFACT, artifact],
                format!("{} rows", self.ids.len()),
                format!("{} rows", other.len()),
            ));
        }

        for (row, (want, got)) in self.ids.iter().zip(other).enumerate() {
            if want == got {
                continue;
            }
            let actual = match self.position(got) {
                Some(pos) => format!("id `{got}` at row {row} (ledger row {pos}): reordered"),
                None => format!("id `{got}` at row {row}: not in ledger"),
            };
            return Err(PipelineIntegrityError::new(
                IntegrityCheck::IdentifierAlignment,
                [Self::ARTIFACT, artifact],
                format!("id `{want}` at row {row}"),
                actual,
            ));
        }
        Ok(())
    }
}

impl Serialize for IdentityLedger {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ids.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IdentityLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ids = Vec::<PostId>::deserialize(deserializer)?;
        IdentityLedger::new(ids).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<PostId> {
        raw.iter().map(|s| PostId::from(*s)).collect()
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let err = IdentityLedger::new(ids(&["a", "b", "a"])).unwrap_err();
        assert_eq!(err.check, IntegrityCheck::IdentifierAlignment);
        assert!(err.actual.contains("rows 0 and 2"));
    }

    #[test]
    fn integer_and_string_ids_normalize() {
        let parsed: Vec<PostId> = serde_json::from_str(r#"[7, "x1", -3]"#).unwrap();
        assert_eq!(parsed, ids(&["7", "x1", "-3"]));
    }

    #[test]
    fn reordering_is_reported_distinctly_from_foreign_ids() {
        let ledger = IdentityLedger::new(ids(&["a", "b", "c"])).unwrap();
        assert!(ledger.verify_aligned("features", &ids(&["a", "b", "c"])).is_ok());

        let reordered = ledger
            .verify_aligned("clusters", &ids(&["b", "a", "c"]))
            .unwrap_err();
        assert_eq!(reordered.check, IntegrityCheck::IdentifierAlignment);
        assert!(reordered.names("clusters"));
        assert!(reordered.actual.contains("reordered"));

        let foreign = ledger
            .verify_aligned("features", &ids(&["a", "z", "c"]))
            .unwrap_err();
        assert!(foreign.actual.contains("not in ledger"));

        let short = ledger.verify_aligned("features", &ids(&["a"])).unwrap_err();
        assert_eq!(short.check, IntegrityCheck::RowCount);
    }

    #[test]
    fn ledger_roundtrips_as_plain_list() {
        let ledger = IdentityLedger::new(ids(&["p1", "p2"])).unwrap();
        let json = serde_json::to_string(&ledger).unwrap();
        assert_eq!(json, r#"["p1","p2"]"#);
        let back: IdentityLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ledger);
        assert!(serde_json::from_str::<IdentityLedger>(r#"["p1","p1"]"#).is_err());
    }
}
