use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy for a single requirement.
///
/// Retryable failures leave the message unseen so the next scheduled run
/// picks it up again. Non-retryable failures will keep failing identically
/// and need operator attention.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TriageError {
    #[error("invalid project title: {0}")]
    InvalidProjectTitle(String),

    #[error("invalid requirement: {0}")]
    InvalidRequirement(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("synthesis rejected: {0}")]
    SynthesisRejected(String),
}

impl TriageError {
    /// Whether the next scheduled run may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::SynthesisUnavailable(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidProjectTitle(_) => "invalid_project_title",
            Self::InvalidRequirement(_) => "invalid_requirement",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::SynthesisUnavailable(_) => "synthesis_unavailable",
            Self::SynthesisRejected(_) => "synthesis_rejected",
        }
    }
}
