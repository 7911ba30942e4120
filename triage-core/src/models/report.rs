use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::MergeOutcome;
use super::project::ProjectSlug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every discovered requirement was attempted.
    Completed,
    /// A shutdown signal arrived; some requirements were deferred.
    Interrupted,
    /// Another run held the lease; nothing was fetched.
    Skipped,
    /// The mailbox could not be read.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryResult {
    Merged(MergeOutcome),
    /// Left unseen because the run was shutting down.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub message_id: String,
    pub project: Option<ProjectSlug>,
    pub received_at: DateTime<Utc>,
    pub result: EntryResult,
    pub marked_seen: bool,
    /// An acknowledgement reached the reply outbox.
    #[serde(default)]
    pub replied: bool,
}

impl ReportEntry {
    pub fn outcome(&self) -> Option<&MergeOutcome> {
        match &self.result {
            EntryResult::Merged(outcome) => Some(outcome),
            EntryResult::Deferred => None,
        }
    }
}

/// Summary of one scheduled run, written to the run journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<ReportEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn skipped(run_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Skipped,
            started_at: at,
            finished_at: at,
            entries: Vec::new(),
            error: None,
        }
    }

    pub fn incorporated(&self) -> usize {
        self.count(|o| matches!(o, MergeOutcome::Incorporated { .. }))
    }

    pub fn already_incorporated(&self) -> usize {
        self.count(|o| matches!(o, MergeOutcome::AlreadyIncorporated { .. }))
    }

    /// Failures the next scheduled run will retry.
    pub fn retryable_failures(&self) -> usize {
        self.count(MergeOutcome::is_retryable_failure)
    }

    /// Failures that need operator attention.
    pub fn rejections(&self) -> usize {
        self.count(|o| o.error().is_some_and(|e| !e.is_retryable()))
    }

    pub fn deferred(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.result == EntryResult::Deferred)
            .count()
    }

    pub fn replied(&self) -> usize {
        self.entries.iter().filter(|e| e.replied).count()
    }

    pub fn entry(&self, message_id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.message_id == message_id)
    }

    fn count(&self, pred: impl Fn(&MergeOutcome) -> bool) -> usize {
        self.entries
            .iter()
            .filter_map(ReportEntry::outcome)
            .filter(|&o| pred(o))
            .count()
    }
}
