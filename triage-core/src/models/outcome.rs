use serde::{Deserialize, Serialize};

use super::epic::EpicRef;
use super::project::ProjectSlug;
use crate::error::TriageError;

/// The merge pipeline step a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStage {
    Validate,
    ResolveProject,
    InitializeProject,
    CheckLedger,
    ResolveRules,
    FetchEpic,
    Synthesize,
    CommitEpic,
    CommitRules,
    CommitLedger,
}

impl MergeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::ResolveProject => "resolve_project",
            Self::InitializeProject => "initialize_project",
            Self::CheckLedger => "check_ledger",
            Self::ResolveRules => "resolve_rules",
            Self::FetchEpic => "fetch_epic",
            Self::Synthesize => "synthesize",
            Self::CommitEpic => "commit_epic",
            Self::CommitRules => "commit_rules",
            Self::CommitLedger => "commit_ledger",
        }
    }
}

/// What happened to one requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    Incorporated {
        project: ProjectSlug,
        epic: EpicRef,
        /// The requirement's attached rules replaced the stored rules.
        rules_updated: bool,
    },
    AlreadyIncorporated {
        project: ProjectSlug,
    },
    Failed {
        /// `None` when the project title could not be resolved.
        project: Option<ProjectSlug>,
        stage: MergeStage,
        error: TriageError,
    },
}

impl MergeOutcome {
    pub fn failed(project: Option<ProjectSlug>, stage: MergeStage, error: TriageError) -> Self {
        Self::Failed {
            project,
            stage,
            error,
        }
    }

    /// The mailbox may mark the message seen only when its content is in the epic.
    pub fn marks_seen(&self) -> bool {
        matches!(
            self,
            Self::Incorporated { .. } | Self::AlreadyIncorporated { .. }
        )
    }

    pub fn project(&self) -> Option<&ProjectSlug> {
        match self {
            Self::Incorporated { project, .. } | Self::AlreadyIncorporated { project } => {
                Some(project)
            }
            Self::Failed { project, .. } => project.as_ref(),
        }
    }

    pub fn error(&self) -> Option<&TriageError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_retryable_failure(&self) -> bool {
        self.error().is_some_and(TriageError::is_retryable)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Incorporated { .. } => "incorporated",
            Self::AlreadyIncorporated { .. } => "already_incorporated",
            Self::Failed { .. } => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug() -> ProjectSlug {
        ProjectSlug::from_title("Project Phoenix").unwrap()
    }

    #[test]
    fn only_incorporated_content_marks_seen() {
        assert!(MergeOutcome::AlreadyIncorporated { project: slug() }.marks_seen());

        let failed = MergeOutcome::failed(
            Some(slug()),
            MergeStage::Synthesize,
            TriageError::SynthesisUnavailable("503".into()),
        );
        assert!(!failed.marks_seen());
        assert!(failed.is_retryable_failure());
    }

    #[test]
    fn serializes_stage_and_error() {
        let failed = MergeOutcome::failed(
            None,
            MergeStage::ResolveProject,
            TriageError::InvalidProjectTitle("???".into()),
        );
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["stage"], "resolve_project");
        assert_eq!(json["error"]["kind"], "invalid_project_title");
    }
}
