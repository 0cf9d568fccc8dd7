//! Psyclust grouping pipeline
//!
//! Turns text embeddings into density-based clusters and proves that every
//! artifact derived along the way stays row-aligned to one post ordering:
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐
//! │  embeddings  │──►│ projection │──►│   HDBSCAN    │
//! │  + id list   │   │ (UMAP-like)│   │ member/noise │
//! └──────┬───────┘   └────────────┘   └──────┬───────┘
//!        │ identity ledger                    │
//!        ▼                                    ▼
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐
//! │   features   │──►│   merge    │──►│  validator   │──► labeling
//! │ (external)   │   │ (on ids)   │   │   (gate)     │
//! └──────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! Every stage reads from and writes to an explicit [`ArtifactStore`]; no path
//! is resolved from ambient state. Integrity violations surface as
//! [`PipelineIntegrityError`] naming the check and artifacts involved.

pub mod cluster;
pub mod config;
pub mod embedding;
pub mod error;
pub mod features;
pub mod ledger;
pub mod matrix;
pub mod merge;
pub mod projection;
pub mod stages;
pub mod store;
pub mod validate;

pub use cluster::{
    hdbscan, Assignment, ClusterDistribution, ClusterSelectionMethod, ClusterTable, HdbscanParams,
    HdbscanResult,
};
pub use config::{ClusterInput, PipelineConfig};
pub use embedding::EmbeddingSet;
pub use error::{IntegrityCheck, PipelineError, PipelineIntegrityError, Result};
pub use features::{FeatureTable, FeatureValue};
pub use ledger::{IdentityLedger, PostId};
pub use matrix::{DenseMatrix, EmbeddingMatrix, Metric};
pub use merge::{merge, MergedTable};
pub use projection::{project, ProjectionArtifact, ProjectionParams};
pub use stages::{
    import_embeddings, import_features, run_all, run_clustering, run_merge, run_projection,
    validate_store, ProjectionRun,
};
pub use store::{ArtifactStore, Slot};
pub use validate::{AlignedArtifact, ConsistencyValidator, ValidationReport};
