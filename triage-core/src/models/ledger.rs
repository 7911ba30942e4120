use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::project::ProjectSlug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOutcome {
    Incorporated,
    Failed,
}

impl LedgerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incorporated => "incorporated",
            Self::Failed => "failed",
        }
    }
}

/// `(project, message id) → outcome` record.
///
/// Once an entry says `Incorporated` it is never rewritten. `Failed` entries
/// document non-retryable rejections and do not block a later incorporation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub project: ProjectSlug,
    pub message_id: String,
    pub outcome: LedgerOutcome,
    pub recorded_at: DateTime<Utc>,
    /// ETag of the epic version that incorporated the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LedgerEntry {
    pub fn incorporated(
        project: ProjectSlug,
        message_id: impl Into<String>,
        epic_etag: Option<String>,
    ) -> Self {
        Self {
            project,
            message_id: message_id.into(),
            outcome: LedgerOutcome::Incorporated,
            recorded_at: Utc::now(),
            epic_etag,
            error: None,
        }
    }

    pub fn failed(project: ProjectSlug, message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            project,
            message_id: message_id.into(),
            outcome: LedgerOutcome::Failed,
            recorded_at: Utc::now(),
            epic_etag: None,
            error: Some(error.into()),
        }
    }

    pub fn is_incorporated(&self) -> bool {
        self.outcome == LedgerOutcome::Incorporated
    }
}
