//! Error taxonomy for the grouping pipeline.
//!
//! Integrity violations are fatal for the run that detects them. They always
//! name the failing check, the artifacts involved, and expected vs. actual
//! shape, so only the broken stage needs to be regenerated.

use serde::{Deserialize, Serialize};

/// One of the ordered checks run by the consistency validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityCheck {
    /// Artifact exists and has at least one row.
    Presence,
    /// Row-aligned artifacts have the same number of rows.
    RowCount,
    /// Identifier-keyed artifacts carry the same ids in the same order.
    IdentifierAlignment,
    /// Composite artifacts have the expected number of columns.
    ColumnCount,
    /// No missing or non-finite values where full population is assumed.
    MissingValues,
}

impl IntegrityCheck {
    pub const ALL: [IntegrityCheck; 5] = [
        IntegrityCheck::Presence,
        IntegrityCheck::RowCount,
        IntegrityCheck::IdentifierAlignment,
        IntegrityCheck::ColumnCount,
        IntegrityCheck::MissingValues,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            IntegrityCheck::Presence => "presence",
            IntegrityCheck::RowCount => "row_count",
            IntegrityCheck::IdentifierAlignment => "identifier_alignment",
            IntegrityCheck::ColumnCount => "column_count",
            IntegrityCheck::MissingValues => "missing_values",
        }
    }
}

impl std::fmt::Display for IntegrityCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed consistency check.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error(
    "pipeline integrity check `{check}` failed for [{}]: expected {expected}, got {actual}",
    .artifacts.join(", ")
)]
pub struct PipelineIntegrityError {
    pub check: IntegrityCheck,
    pub artifacts: Vec<String>,
    pub expected: String,
    pub actual: String,
}

impl PipelineIntegrityError {
    pub fn new(
        check: IntegrityCheck,
        artifacts: impl IntoIterator<Item = impl Into<String>>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            check,
            artifacts: artifacts.into_iter().map(Into::into).collect(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// True when `name` is one of the artifacts this failure names.
    pub fn names(&self, name: &str) -> bool {
        self.artifacts.iter().any(|a| a == name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("insufficient data for {stage}: need at least {required} rows, got {actual}")]
    InsufficientData {
        stage: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("empty input: {stage} received zero rows")]
    EmptyInput { stage: &'static str },

    #[error(transparent)]
    Integrity(#[from] PipelineIntegrityError),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("artifact `{slot}`: {message}")]
    Artifact { slot: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        PipelineError::InvalidParameter(message.into())
    }

    pub fn integrity(&self) -> Option<&PipelineIntegrityError> {
        match self {
            PipelineError::Integrity(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_error_message_names_check_and_artifacts() {
        let err = PipelineIntegrityError::new(
            IntegrityCheck::IdentifierAlignment,
            ["ids", "clusters"],
            "id `a` at row 0",
            "id `d` at row 0",
        );
        let msg = err.to_string();
        assert!(msg.contains("identifier_alignment"));
        assert!(msg.contains("ids, clusters"));
        assert!(msg.contains("expected id `a` at row 0"));
        assert!(err.names("clusters"));
        assert!(!err.names("features"));
    }

    #[test]
    fn insufficient_data_reports_counts() {
        let err = PipelineError::InsufficientData {
            stage: "projection",
            required: 2,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "insufficient data for projection: need at least 2 rows, got 1"
        );
    }
}
