use psyclust_pipeline::PipelineError;

/// Failure reported by a completion backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    /// A label record is missing a required key or has the wrong shape.
    /// Recoverable: the record is skipped.
    #[error("malformed record `{record}`: {reason}")]
    MalformedRecord { record: String, reason: String },

    /// The drafting collaborator failed for one cluster. Recoverable: the
    /// batch moves on.
    #[error("external collaborator failed for cluster {cluster_id}: {message}")]
    ExternalCollaborator { cluster_id: u32, message: String },

    #[error("no review transition from `{state}`")]
    IllegalTransition { state: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LabelError {
    pub fn malformed(record: impl Into<String>, reason: impl Into<String>) -> Self {
        LabelError::MalformedRecord {
            record: record.into(),
            reason: reason.into(),
        }
    }

    /// Errors that skip one record or cluster instead of ending the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LabelError::MalformedRecord { .. } | LabelError::ExternalCollaborator { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LabelError>;
