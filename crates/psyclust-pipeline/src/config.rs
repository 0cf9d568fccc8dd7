//! Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::cluster::HdbscanParams;
use crate::error::Result;
use crate::projection::ProjectionParams;

/// Which matrix the cluster engine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterInput {
    #[default]
    Projection,
    Embeddings,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub projection: ProjectionParams,
    pub clustering: HdbscanParams,
    pub cluster_on: ClusterInput,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.projection.validate()?;
        self.clustering.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Metric;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{ "projection": { "n_neighbors": 5 }, "cluster_on": "embeddings" }"#,
        )
        .unwrap();
        assert_eq!(cfg.projection.n_neighbors, 5);
        assert_eq!(cfg.projection.metric, Metric::Cosine);
        assert_eq!(cfg.projection.seed, 42);
        assert_eq!(cfg.clustering.min_cluster_size, 2);
        assert_eq!(cfg.cluster_on, ClusterInput::Embeddings);
        cfg.validate().unwrap();
    }
}
