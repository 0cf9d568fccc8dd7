//! Consistency validator: the gate between grouping and labeling.
//!
//! Checks run in a fixed order and stop at the first violation:
//!
//! 1. presence: every required artifact exists and has rows
//! 2. row count: row-aligned artifacts match the ledger
//! 3. identifier alignment: id-keyed artifacts list ledger ids in ledger order
//! 4. column count: composite artifacts have their expected width
//! 5. missing values: no absent, NaN or infinite cells
//!
//! On success the cluster-size distribution is attached as a diagnostic.
//! Nothing is ever repaired here.

use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterDistribution, ClusterTable};
use crate::embedding::EmbeddingSet;
use crate::error::{IntegrityCheck, PipelineIntegrityError};
use crate::features::FeatureTable;
use crate::ledger::{IdentityLedger, PostId};
use crate::merge::MergedTable;
use crate::projection::ProjectionArtifact;

/// What the validator needs to know about one artifact.
pub trait AlignedArtifact {
    fn artifact_name(&self) -> &str;

    fn row_count(&self) -> usize;

    /// Row ids, for artifacts keyed by post id. Positional artifacts return `None`.
    fn row_ids(&self) -> Option<&[PostId]> {
        None
    }

    /// Actual column count, for composite artifacts.
    fn column_count(&self) -> Option<usize> {
        None
    }

    /// Location of the first missing or non-finite cell, if any.
    fn first_undefined_cell(&self) -> Option<String>;
}

impl AlignedArtifact for EmbeddingSet {
    fn artifact_name(&self) -> &str {
        Self::ARTIFACT
    }

    fn row_count(&self) -> usize {
        self.len()
    }

    fn row_ids(&self) -> Option<&[PostId]> {
        Some(self.ids())
    }

    fn first_undefined_cell(&self) -> Option<String> {
        self.vectors()
            .first_non_finite()
            .map(|(row, col)| format!("row {row}, dimension {col}"))
    }
}

impl AlignedArtifact for ProjectionArtifact {
    fn artifact_name(&self) -> &str {
        Self::ARTIFACT
    }

    fn row_count(&self) -> usize {
        self.coordinates.nrows()
    }

    fn first_undefined_cell(&self) -> Option<String> {
        self.coordinates
            .first_non_finite()
            .map(|(row, col)| format!("row {row}, component {col}"))
    }
}

impl AlignedArtifact for ClusterTable {
    fn artifact_name(&self) -> &str {
        Self::ARTIFACT
    }

    fn row_count(&self) -> usize {
        self.len()
    }

    fn row_ids(&self) -> Option<&[PostId]> {
        Some(self.ids())
    }

    fn first_undefined_cell(&self) -> Option<String> {
        self.first_undefined_score()
            .map(|(row, column)| format!("row {row}, column `{column}`"))
    }
}

impl AlignedArtifact for FeatureTable {
    fn artifact_name(&self) -> &str {
        Self::ARTIFACT
    }

    fn row_count(&self) -> usize {
        self.len()
    }

    fn row_ids(&self) -> Option<&[PostId]> {
        Some(self.ids())
    }

    fn column_count(&self) -> Option<usize> {
        Some(self.columns().len())
    }

    fn first_undefined_cell(&self) -> Option<String> {
        self.first_undefined()
            .map(|(row, column)| format!("row {row}, column `{column}`"))
    }
}

impl AlignedArtifact for MergedTable {
    fn artifact_name(&self) -> &str {
        Self::ARTIFACT
    }

    fn row_count(&self) -> usize {
        self.len()
    }

    fn row_ids(&self) -> Option<&[PostId]> {
        Some(self.ids())
    }

    fn column_count(&self) -> Option<usize> {
        Some(self.columns().len())
    }

    fn first_undefined_cell(&self) -> Option<String> {
        self.first_undefined()
            .map(|(row, column)| format!("row {row}, column `{column}`"))
    }
}

/// Successful validation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub rows: usize,
    pub artifacts: Vec<String>,
    pub checks: Vec<IntegrityCheck>,
    /// Cluster sizes (noise included), when a cluster table was validated.
    pub distribution: Option<ClusterDistribution>,
}

enum Entry<'a> {
    Present(&'a dyn AlignedArtifact),
    Absent(String),
}

impl Entry<'_> {
    fn name(&self) -> &str {
        match self {
            Entry::Present(a) => a.artifact_name(),
            Entry::Absent(name) => name,
        }
    }
}

/// Builder over borrowed artifacts.
///
/// ```ignore
/// let report = ConsistencyValidator::new(&ledger)
///     .require(&features)
///     .require(&clusters)
///     .expect_columns(MergedTable::ARTIFACT, 5)
///     .require(&merged)
///     .with_clusters(&clusters)
///     .validate()?;
/// ```
pub struct ConsistencyValidator<'a> {
    ledger: Option<&'a IdentityLedger>,
    artifacts: Vec<Entry<'a>>,
    expected_columns: Vec<(String, usize)>,
    clusters: Option<&'a ClusterTable>,
}

impl<'a> ConsistencyValidator<'a> {
    pub fn new(ledger: &'a IdentityLedger) -> Self {
        Self {
            ledger: Some(ledger),
            artifacts: Vec::new(),
            expected_columns: Vec::new(),
            clusters: None,
        }
    }

    /// Validator whose reference ledger could not be loaded. Fails the
    /// presence check.
    pub fn without_ledger() -> Self {
        Self {
            ledger: None,
            artifacts: Vec::new(),
            expected_columns: Vec::new(),
            clusters: None,
        }
    }

    pub fn require(mut self, artifact: &'a dyn AlignedArtifact) -> Self {
        self.artifacts.push(Entry::Present(artifact));
        self
    }

    /// Register a required artifact that does not exist.
    pub fn require_missing(mut self, name: impl Into<String>) -> Self {
        self.artifacts.push(Entry::Absent(name.into()));
        self
    }

    pub fn expect_columns(mut self, name: impl Into<String>, columns: usize) -> Self {
        self.expected_columns.push((name.into(), columns));
        self
    }

    /// Cluster table used for the distribution diagnostic.
    pub fn with_clusters(mut self, clusters: &'a ClusterTable) -> Self {
        self.clusters = Some(clusters);
        self
    }

    pub fn validate(&self) -> Result<ValidationReport, PipelineIntegrityError> {
        let ledger = self.check_presence()?;
        self.check_row_counts(ledger)?;
        self.check_identifiers(ledger)?;
        self.check_columns()?;
        self.check_missing_values()?;

        let distribution = self.clusters.map(ClusterTable::distribution);
        if let Some(dist) = &distribution {
            tracing::info!(
                clusters = dist.cluster_count(),
                noise = dist.noise,
                rows = dist.total(),
                "cluster distribution"
            );
        }

        let mut artifacts = vec![IdentityLedger::ARTIFACT.to_string()];
        artifacts.extend(self.artifacts.iter().map(|s| s.name().to_string()));
        Ok(ValidationReport {
            rows: ledger.len(),
            artifacts,
            checks: IntegrityCheck::ALL.to_vec(),
            distribution,
        })
    }

    fn present(&self) -> impl Iterator<Item = &'a dyn AlignedArtifact> + '_ {
        self.artifacts.iter().filter_map(|s| match s {
            Entry::Present(a) => Some(*a),
            Entry::Absent(_) => None,
        })
    }

    fn check_presence(&self) -> Result<&'a IdentityLedger, PipelineIntegrityError> {
        let missing = |name: &str| {
            PipelineIntegrityError::new(IntegrityCheck::Presence, [name], "artifact present", "absent")
        };
        let empty = |name: &str| {
            PipelineIntegrityError::new(IntegrityCheck::Presence, [name], "at least 1 row", "0 rows")
        };

        let ledger = self.ledger.ok_or_else(|| missing(IdentityLedger::ARTIFACT))?;
        if ledger.is_empty() {
            return Err(empty(IdentityLedger::ARTIFACT));
        }
        for slot in &self.artifacts {
            match slot {
                Entry::Absent(name) => return Err(missing(name)),
                Entry::Present(a) if a.row_count() == 0 => return Err(empty(a.artifact_name())),
                Entry::Present(_) => {}
            }
        }
        Ok(ledger)
    }

    fn check_row_counts(&self, ledger: &IdentityLedger) -> Result<(), PipelineIntegrityError> {
        for a in self.present() {
            if a.row_count() != ledger.len() {
                return Err(PipelineIntegrityError::new(
                    IntegrityCheck::RowCount,
                    [IdentityLedger::ARTIFACT, a.artifact_name()],
                    format!("{} rows", ledger.len()),
                    format!("{} rows", a.row_count()),
                ));
            }
        }
        Ok(())
    }

    fn check_identifiers(&self, ledger: &IdentityLedger) -> Result<(), PipelineIntegrityError> {
        for a in self.present() {
            if let Some(ids) = a.row_ids() {
                ledger.verify_aligned(a.artifact_name(), ids)?;
            }
        }
        Ok(())
    }

    fn check_columns(&self) -> Result<(), PipelineIntegrityError> {
        for (name, expected) in &self.expected_columns {
            let Some(artifact) = self.present().find(|a| a.artifact_name() == name.as_str()) else {
                continue;
            };
            let actual = artifact.column_count().unwrap_or(0);
            if actual != *expected {
                return Err(PipelineIntegrityError::new(
                    IntegrityCheck::ColumnCount,
                    [name.as_str()],
                    format!("{expected} columns"),
                    format!("{actual} columns"),
                ));
            }
        }
        Ok(())
    }

    fn check_missing_values(&self) -> Result<(), PipelineIntegrityError> {
        for a in self.present() {
            if let Some(location) = a.first_undefined_cell() {
                return Err(PipelineIntegrityError::new(
                    IntegrityCheck::MissingValues,
                    [a.artifact_name()],
                    "fully populated values",
                    format!("missing or non-finite value at {location}"),
                ));
            }
        }
        Ok(())
    }
}
