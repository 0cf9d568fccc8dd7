//! Stage drivers over an [`ArtifactStore`].
//!
//! Each stage reads its inputs from the store, runs to completion and
//! persists its output before returning. A stage that replaces an artifact
//! also drops the merged table built from the old one, so nothing downstream
//! silently refers to superseded rows.

use crate::cluster::{hdbscan, ClusterTable};
use crate::config::{ClusterInput, PipelineConfig};
use crate::embedding::EmbeddingSet;
use crate::error::{IntegrityCheck, PipelineError, PipelineIntegrityError, Result};
use crate::features::FeatureTable;
use crate::ledger::IdentityLedger;
use crate::merge::{merge, MergedTable};
use crate::projection::{project, ProjectionArtifact, ProjectionParams};
use crate::store::{ArtifactStore, Slot};
use crate::validate::{AlignedArtifact, ConsistencyValidator, ValidationReport};

/// Persist embeddings and the ledger derived from their id list.
pub fn import_embeddings(store: &ArtifactStore, embeddings: &EmbeddingSet) -> Result<IdentityLedger> {
    if embeddings.is_empty() {
        return Err(PipelineError::EmptyInput { stage: "import" });
    }
    let ledger = embeddings.ledger()?;
    store.write(Slot::Ids, &ledger)?;
    store.write(Slot::Embeddings, embeddings)?;
    invalidate(store, &[Slot::Projection, Slot::Clusters, Slot::Merged])?;
    tracing::info!(rows = ledger.len(), width = embeddings.width(), "embeddings imported");
    Ok(ledger)
}

/// Persist externally extracted features. Alignment is checked at merge time.
pub fn import_features(store: &ArtifactStore, features: &FeatureTable) -> Result<()> {
    store.write(Slot::Features, features)?;
    invalidate(store, &[Slot::Merged])?;
    tracing::info!(rows = features.len(), columns = features.columns().len(), "features imported");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionRun {
    pub rows: usize,
    pub components: usize,
    /// The stored projection already matched the embeddings and parameters.
    pub cached: bool,
}

/// Project the stored embeddings, reusing a current cached projection unless
/// `force` is set.
pub fn run_projection(
    store: &ArtifactStore,
    params: &ProjectionParams,
    force: bool,
) -> Result<ProjectionRun> {
    let source_digest = store.read_digest(Slot::Embeddings)?;
    if !force {
        if let Some(existing) = store.read_optional::<ProjectionArtifact>(Slot::Projection)? {
            if existing.is_current(&source_digest, params) {
                tracing::info!("projection is current; reusing cached artifact");
                return Ok(ProjectionRun {
                    rows: existing.coordinates.nrows(),
                    components: existing.coordinates.ncols(),
                    cached: true,
                });
            }
        }
    }

    let embeddings: EmbeddingSet = store.read(Slot::Embeddings)?;
    let coordinates = project(embeddings.vectors(), params)?;
    let run = ProjectionRun {
        rows: coordinates.nrows(),
        components: coordinates.ncols(),
        cached: false,
    };
    store.write(
        Slot::Projection,
        &ProjectionArtifact {
            source_digest,
            params: params.clone(),
            coordinates,
        },
    )?;
    invalidate(store, &[Slot::Clusters, Slot::Merged])?;
    tracing::info!(rows = run.rows, components = run.components, "projection written");
    Ok(run)
}

/// Cluster the projection (or raw embeddings) and persist assignments.
pub fn run_clustering(store: &ArtifactStore, config: &PipelineConfig) -> Result<ClusterTable> {
    let ledger: IdentityLedger = store.read(Slot::Ids)?;
    let embeddings: EmbeddingSet = store.read(Slot::Embeddings)?;
    ledger.verify_aligned(EmbeddingSet::ARTIFACT, embeddings.ids())?;

    let result = match config.cluster_on {
        ClusterInput::Embeddings => hdbscan(embeddings.vectors(), &config.clustering)?,
        ClusterInput::Projection => {
            let projection: ProjectionArtifact =
                store.read_optional(Slot::Projection)?.ok_or_else(|| PipelineError::Artifact {
                    slot: Slot::Projection.name().to_string(),
                    message: "no projection stored; run the projection stage first".to_string(),
                })?;
            let source_digest = store.read_digest(Slot::Embeddings)?;
            if projection.source_digest != source_digest {
                return Err(PipelineError::Artifact {
                    slot: Slot::Projection.name().to_string(),
                    message: "projection was computed from different embeddings; regenerate it"
                        .to_string(),
                });
            }
            if projection.coordinates.nrows() != ledger.len() {
                return Err(PipelineIntegrityError::new(
                    IntegrityCheck::RowCount,
                    [IdentityLedger::ARTIFACT, ProjectionArtifact::ARTIFACT],
                    format!("{} rows", ledger.len()),
                    format!("{} rows", projection.coordinates.nrows()),
                )
                .into());
            }
            hdbscan(&projection.coordinates, &config.clustering)?
        }
    };

    let table = ClusterTable::from_result(ledger.ids().to_vec(), result)?;
    store.write(Slot::Clusters, &table)?;
    invalidate(store, &[Slot::Merged])?;

    let dist = table.distribution();
    tracing::info!(
        clusters = dist.cluster_count(),
        noise = dist.noise,
        rows = dist.total(),
        input = ?config.cluster_on,
        "clustering written"
    );
    Ok(table)
}

/// Join stored features, clusters and embeddings into the merged table.
pub fn run_merge(store: &ArtifactStore) -> Result<MergedTable> {
    let ledger: IdentityLedger = store.read(Slot::Ids)?;
    let features: FeatureTable = store.read(Slot::Features)?;
    let clusters: ClusterTable = store.read(Slot::Clusters)?;
    let embeddings: EmbeddingSet = store.read(Slot::Embeddings)?;
    let merged = merge(&ledger, &features, &clusters, &embeddings)?;
    store.write(Slot::Merged, &merged)?;
    Ok(merged)
}

/// Run the consistency validator over everything in the store.
///
/// The projection is checked when present; it is optional because clustering
/// may run directly on embeddings.
pub fn validate_store(store: &ArtifactStore) -> Result<ValidationReport> {
    let ledger: Option<IdentityLedger> = store.read_optional(Slot::Ids)?;
    let embeddings: Option<EmbeddingSet> = store.read_optional(Slot::Embeddings)?;
    let projection: Option<ProjectionArtifact> = store.read_optional(Slot::Projection)?;
    let clusters: Option<ClusterTable> = store.read_optional(Slot::Clusters)?;
    let features: Option<FeatureTable> = store.read_optional(Slot::Features)?;
    let merged: Option<MergedTable> = store.read_optional(Slot::Merged)?;

    let mut validator = match &ledger {
        Some(l) => ConsistencyValidator::new(l),
        None => ConsistencyValidator::without_ledger(),
    };
    validator = require_slot(validator, Slot::Embeddings, embeddings.as_ref());
    if let Some(p) = &projection {
        validator = validator.require(p);
    }
    validator = require_slot(validator, Slot::Clusters, clusters.as_ref());
    validator = require_slot(validator, Slot::Features, features.as_ref());
    validator = require_slot(validator, Slot::Merged, merged.as_ref());

    if let (Some(f), Some(e)) = (&features, &embeddings) {
        validator = validator.expect_columns(
            MergedTable::ARTIFACT,
            MergedTable::expected_columns(f.columns().len(), e.width()),
        );
    }
    if let Some(c) = &clusters {
        validator = validator.with_clusters(c);
    }

    let report = validator.validate()?;
    tracing::info!(rows = report.rows, artifacts = report.artifacts.len(), "validation passed");
    Ok(report)
}

/// Projection (when clustering on it), clustering, merge and validation.
pub fn run_all(store: &ArtifactStore, config: &PipelineConfig) -> Result<ValidationReport> {
    config.validate()?;
    if config.cluster_on == ClusterInput::Projection {
        run_projection(store, &config.projection, false)?;
    }
    run_clustering(store, config)?;
    run_merge(store)?;
    validate_store(store)
}

fn require_slot<'a, T: AlignedArtifact>(
    validator: ConsistencyValidator<'a>,
    slot: Slot,
    artifact: Option<&'a T>,
) -> ConsistencyValidator<'a> {
    match artifact {
        Some(a) => validator.require(a),
        None => validator.require_missing(slot.name()),
    }
}

fn invalidate(store: &ArtifactStore, slots: &[Slot]) -> Result<()> {
    for &slot in slots {
        if store.exists(slot) {
            store.remove(slot)?;
            tracing::debug!(slot = %slot, "dropped downstream artifact");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureValue;
    use crate::ledger::PostId;
    use tempfile::tempdir;

    fn blob_embeddings() -> EmbeddingSet {
        let mut ids = Vec::new();
        let mut rows = Vec::new();
        for (c, center) in [[0.0f32, 0.0, 0.0], [20.0, 20.0, 0.0]].iter().enumerate() {
            for i in 0..6 {
                ids.push(PostId::from(format!("p{c}_{i}")));
                let jitter = i as f32 * 0.05;
                rows.push(vec![center[0] + jitter, center[1] - jitter, center[2] + 1.0]);
            }
        }
        EmbeddingSet::from_rows(ids, rows).unwrap()
    }

    fn features_for(ids: &[PostId]) -> FeatureTable {
        FeatureTable::new(
            ids.to_vec(),
            vec!["sentiment_polarity".into()],
            ids.iter().map(|_| vec![FeatureValue::Number(0.25)]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn full_run_on_embeddings_validates() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let embeddings = blob_embeddings();
        let ledger = import_embeddings(&store, &embeddings).unwrap();
        import_features(&store, &features_for(ledger.ids())).unwrap();

        let config = PipelineConfig {
            cluster_on: ClusterInput::Embeddings,
            clustering: crate::cluster::HdbscanParams {
                min_cluster_size: 3,
                metric: crate::matrix::Metric::Euclidean,
                ..Default::default()
            },
            ..Default::default()
        };
        let report = run_all(&store, &config).unwrap();
        assert_eq!(report.rows, 12);
        let dist = report.distribution.unwrap();
        assert_eq!(dist.total(), 12);
        assert_eq!(dist.cluster_count(), 2);

        let merged: MergedTable = store.read(Slot::Merged).unwrap();
        assert_eq!(merged.columns().len(), 1 + 1 + 3);
    }

    #[test]
    fn projection_is_cached_until_embeddings_change() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        import_embeddings(&store, &blob_embeddings()).unwrap();
        let params = ProjectionParams {
            n_epochs: Some(20),
            ..Default::default()
        };

        let first = run_projection(&store, &params, false).unwrap();
        assert!(!first.cached);
        assert_eq!((first.rows, first.components), (12, 2));
        assert!(run_projection(&store, &params, false).unwrap().cached);
        assert!(!run_projection(&store, &params, true).unwrap().cached);

        import_embeddings(&store, &blob_embeddings()).unwrap();
        assert!(!store.exists(Slot::Projection));
    }

    #[test]
    fn clustering_on_missing_projection_is_an_artifact_error() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        import_embeddings(&store, &blob_embeddings()).unwrap();
        let err = run_clustering(&store, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Artifact { ref slot, .. } if slot == "projection"));
    }

    #[test]
    fn validating_an_empty_store_fails_presence_on_ids() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let err = validate_store(&store).unwrap_err();
        let integrity = err.integrity().unwrap();
        assert_eq!(integrity.check, IntegrityCheck::Presence);
        assert!(integrity.names("ids"));
    }

    #[test]
    fn reordered_features_fail_merge() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let ledger = import_embeddings(&store, &blob_embeddings()).unwrap();
        let mut shuffled = ledger.ids().to_vec();
        shuffled.swap(0, 5);
        import_features(&store, &features_for(&shuffled)).unwrap();
        run_clustering(
            &store,
            &PipelineConfig {
                cluster_on: ClusterInput::Embeddings,
                ..Default::default()
            },
        )
        .unwrap();

        let err = run_merge(&store).unwrap_err();
        let integrity = err.integrity().unwrap();
        assert_eq!(integrity.check, IntegrityCheck::IdentifierAlignment);
        assert!(integrity.names("features"));
        assert!(!store.exists(Slot::Merged));
    }
}
