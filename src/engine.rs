//! Epic Merge Engine: fold one requirement into its project's epic.
//!
//! Callers must not run two merges for the same project at once; the run
//! coordinator holds a per-project token around every call to
//! [`EpicMergeEngine::merge`].

use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;
use triage_core::models::{
    resolve as resolve_rules, EpicDocument, MergeOutcome, MergeStage, ProjectSlug, Requirement,
    RuleSet,
};
use triage_core::TriageError;

use crate::ledger::Ledger;
use crate::store::{ObjectStore, ProjectStore, StoreOptions};
use crate::synthesis::{normalize_document, SynthesisError, Synthesizer};

struct StageFailure {
    project: Option<ProjectSlug>,
    stage: MergeStage,
    error: TriageError,
}

/// Tag an error with the project and stage it happened in.
fn at<E: Into<TriageError>>(
    project: &ProjectSlug,
    stage: MergeStage,
) -> impl FnOnce(E) -> StageFailure + '_ {
    move |err| StageFailure {
        project: Some(project.clone()),
        stage,
        error: err.into(),
    }
}

#[derive(Clone)]
pub struct EpicMergeEngine {
    store: Arc<dyn ObjectStore>,
    synthesizer: Arc<dyn Synthesizer>,
    ledger: Ledger,
    options: StoreOptions,
}

impl EpicMergeEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        synthesizer: Arc<dyn Synthesizer>,
        options: StoreOptions,
    ) -> Self {
        Self {
            ledger: Ledger::new(store.clone(), options.clone()),
            store,
            synthesizer,
            options,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn project_store(&self, slug: ProjectSlug) -> ProjectStore {
        ProjectStore::new(self.store.clone(), slug, &self.options)
    }

    /// Merge one requirement. Never panics on collaborator failure; every
    /// failure comes back as [`MergeOutcome::Failed`] tagged with its stage.
    pub async fn merge(&self, requirement: &Requirement) -> MergeOutcome {
        let span = tracing::info_span!(
            "merge",
            message_id = %requirement.message_id,
            project_title = %requirement.project_title
        );

        let outcome = match self.try_merge(requirement).instrument(span).await {
            Ok(outcome) => outcome,
            Err(failure) => MergeOutcome::failed(failure.project, failure.stage, failure.error),
        };

        if let MergeOutcome::Failed {
            project,
            stage,
            error,
        } = &outcome
        {
            let project = project.as_ref().map(ProjectSlug::as_str).unwrap_or("-");
            if error.is_retryable() {
                tracing::warn!(
                    project,
                    message_id = %requirement.message_id,
                    stage = stage.as_str(),
                    error = %error,
                    "Merge failed, will retry next run"
                );
            } else {
                tracing::error!(
                    project,
                    message_id = %requirement.message_id,
                    stage = stage.as_str(),
                    error = %error,
                    "Merge rejected, needs operator attention"
                );
            }
        }

        outcome
    }

    async fn try_merge(&self, requirement: &Requirement) -> Result<MergeOutcome, StageFailure> {
        let slug = requirement.slug().map_err(|error| StageFailure {
            project: None,
            stage: MergeStage::ResolveProject,
            error,
        })?;
        requirement
            .validate()
            .map_err(at(&slug, MergeStage::Validate))?;

        let message_id = requirement.message_id.as_str();
        let project = self.project_store(slug.clone());

        project
            .ensure_project_initialized()
            .await
            .map_err(at(&slug, MergeStage::InitializeProject))?;

        if self
            .ledger
            .has_incorporated(&slug, message_id)
            .await
            .map_err(at(&slug, MergeStage::CheckLedger))?
        {
            tracing::info!(project = %slug, message_id, "Requirement already incorporated");
            return Ok(MergeOutcome::AlreadyIncorporated { project: slug });
        }

        let stored = project
            .get_rules()
            .await
            .map_err(at(&slug, MergeStage::ResolveRules))?;
        let resolved = resolve_rules(requirement, stored);
        tracing::debug!(
            project = %slug,
            message_id,
            source = resolved.effective.source.as_str(),
            persist = resolved.should_persist,
            "Resolved rules"
        );

        let prior = project
            .get_epic()
            .await
            .map_err(at(&slug, MergeStage::FetchEpic))?;

        // The epic was committed by this message but the ledger write never happened
        if let Some(prior) = &prior {
            if prior.source_message_id.as_deref() == Some(message_id) {
                if resolved.should_persist {
                    project
                        .put_rules(&resolved.effective.text)
                        .await
                        .map_err(at(&slug, MergeStage::CommitRules))?;
                }
                self.ledger
                    .mark_incorporated(&slug, message_id, Some(prior.etag.clone()))
                    .await
                    .map_err(at(&slug, MergeStage::CommitLedger))?;
                tracing::warn!(project = %slug, message_id, "Repaired missing ledger entry");
                return Ok(MergeOutcome::AlreadyIncorporated { project: slug });
            }
        }

        let content = self
            .synthesize(requirement, prior.as_ref(), &resolved.effective)
            .await;
        let content = match content.and_then(|raw| normalize_document(&raw)) {
            Ok(content) => content,
            Err(err) => {
                if let SynthesisError::Rejected(detail) = &err {
                    if let Err(e) = self.ledger.mark_failed(&slug, message_id, detail).await {
                        tracing::warn!(project = %slug, message_id, error = %e, "Could not record rejection in ledger");
                    }
                }
                return Err(at(&slug, MergeStage::Synthesize)(err));
            }
        };

        let mut doc = EpicDocument::new(
            slug.clone(),
            &requirement.project_title,
            content,
            Some(message_id.to_string()),
            Utc::now(),
        );

        let meta = project
            .put_epic(&doc)
            .await
            .map_err(at(&slug, MergeStage::CommitEpic))?;
        doc.etag = meta.etag;

        if resolved.should_persist {
            project
                .put_rules(&resolved.effective.text)
                .await
                .map_err(at(&slug, MergeStage::CommitRules))?;
        }

        self.ledger
            .mark_incorporated(&slug, message_id, Some(doc.etag.clone()))
            .await
            .map_err(at(&slug, MergeStage::CommitLedger))?;

        tracing::info!(
            project = %slug,
            message_id,
            file_id = %doc.file_id,
            rules_updated = resolved.should_persist,
            "Requirement incorporated"
        );

        Ok(MergeOutcome::Incorporated {
            project: slug,
            epic: doc.reference(),
            rules_updated: resolved.should_persist,
        })
    }

    async fn synthesize(
        &self,
        requirement: &Requirement,
        prior: Option<&EpicDocument>,
        rules: &RuleSet,
    ) -> Result<String, SynthesisError> {
        let limit = self.options.call_timeout;
        tracing::debug!(
            backend = self.synthesizer.name(),
            update = prior.is_some(),
            "Synthesizing epic"
        );
        tokio::time::timeout(limit, self.synthesizer.synthesize(requirement, prior, rules))
            .await
            .map_err(|_| SynthesisError::Unavailable(format!("timed out after {:?}", limit)))?
    }
}
