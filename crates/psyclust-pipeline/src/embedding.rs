//! Embedding input: a dense matrix plus the parallel id list it was computed for.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::ledger::{IdentityLedger, PostId};
use crate::matrix::DenseMatrix;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSet {
    ids: Vec<PostId>,
    vectors: DenseMatrix,
}

impl EmbeddingSet {
    pub const ARTIFACT: &'static str = "embeddings";

    pub fn new(ids: Vec<PostId>, vectors: DenseMatrix) -> Result<Self> {
        if ids.len() != vectors.nrows() {
            return Err(PipelineError::invalid_parameter(format!(
                "{} ids for {} embedding rows",
                ids.len(),
                vectors.nrows()
            )));
        }
        Ok(Self { ids, vectors })
    }

    /// Build from nested rows as produced by an external encoder.
    pub fn from_rows(ids: Vec<PostId>, rows: Vec<Vec<f32>>) -> Result<Self> {
        Self::new(ids, DenseMatrix::from_rows(rows)?)
    }

    pub fn ids(&self) -> &[PostId] {
        &self.ids
    }

    pub fn vectors(&self) -> &DenseMatrix {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn width(&self) -> usize {
        self.vectors.ncols()
    }

    /// The id list as a ledger; fails on duplicate ids.
    pub fn ledger(&self) -> Result<IdentityLedger> {
        Ok(IdentityLedger::new(self.ids.clone())?)
    }
}
