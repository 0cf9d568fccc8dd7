//! On-disk profiler configuration: pipeline parameters, labeling knobs and
//! store locations in one JSON document.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use psyclust_labels::{LabelStoreLayout, LabelingConfig};
use psyclust_pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub pipeline: PipelineConfig,
    pub labeling: LabelingConfig,
    /// Artifact store directory.
    pub artifacts_dir: PathBuf,
    /// Root for drafts, finals, backups, profiles and the review summary.
    pub outputs_dir: PathBuf,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            labeling: LabelingConfig::default(),
            artifacts_dir: PathBuf::from("artifacts"),
            outputs_dir: PathBuf::from("outputs"),
        }
    }
}

impl ProfilerConfig {
    /// Defaults, or the JSON file at `path` with absent keys defaulted.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config
            .pipeline
            .validate()
            .with_context(|| format!("invalid pipeline parameters in {}", path.display()))?;
        Ok(config)
    }

    pub fn layout(&self) -> LabelStoreLayout {
        LabelStoreLayout::under(&self.outputs_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_path_gives_defaults() {
        let cfg = ProfilerConfig::load(None).unwrap();
        assert_eq!(cfg, ProfilerConfig::default());
        assert_eq!(cfg.labeling.top_n, 3);
        assert_eq!(cfg.pipeline.projection.n_neighbors, 15);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("psyclust.json");
        fs::write(
            &path,
            r#"{"labeling": {"top_n": 5}, "pipeline": {"clustering": {"min_cluster_size": 4}}}"#,
        )
        .unwrap();
        let cfg = ProfilerConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.labeling.top_n, 5);
        assert_eq!(cfg.labeling.excerpt_chars, 500);
        assert_eq!(cfg.pipeline.clustering.min_cluster_size, 4);
        assert_eq!(cfg.outputs_dir, PathBuf::from("outputs"));
    }

    #[test]
    fn invalid_parameters_are_rejected_at_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"pipeline": {"clustering": {"min_cluster_size": 1}}}"#).unwrap();
        assert!(ProfilerConfig::load(Some(&path)).is_err());
    }
}
