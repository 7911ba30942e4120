//! Run Coordinator: one run at a time process-wide, one merge at a time per project.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{watch, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;
use triage_core::models::{
    EntryResult, MergeOutcome, ProjectSlug, ReportEntry, Requirement, RunReport, RunStatus,
};
use uuid::Uuid;

use crate::config::Settings;
use crate::db::Database;
use crate::engine::EpicMergeEngine;
use crate::intake::{Mailbox, MailboxError, Replier, Reply, ReplyError, RequirementParser};
use crate::store::{with_timeout, ObjectStore, ObjectWrite, StoreError, JSON};

/// Name of the process-wide run lease.
pub const RUN_LEASE: &str = "triage-run";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("run lease unavailable: {0}")]
    Lease(String),

    #[error("invalid subject prefix: {0}")]
    SubjectPrefix(#[from] regex::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub max_concurrent_projects: usize,
    pub lease_ttl: Duration,
    pub call_timeout: Duration,
    pub subject_prefix: String,
    /// `None` disables the run journal.
    pub journal_bucket: Option<String>,
}

impl CoordinatorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_concurrent_projects: settings.max_concurrent_projects,
            lease_ttl: settings.lease_ttl,
            call_timeout: settings.call_timeout,
            subject_prefix: settings.subject_prefix.clone(),
            journal_bucket: Some(settings.journal_bucket.clone()),
        }
    }
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_projects: 4,
            lease_ttl: Duration::from_secs(900),
            call_timeout: Duration::from_secs(120),
            subject_prefix: "[JARVIS]-".to_string(),
            journal_bucket: None,
        }
    }
}

// ============================================================
// Run lease
// ============================================================

/// Holds the run lease; renews it in the background and releases it on drop.
///
/// If another holder takes the lease over, or renewal keeps failing until the
/// lease expires, [`LeaseGuard::lost`] flips to `true` and renewal stops.
pub struct LeaseGuard {
    db: Database,
    holder: String,
    lost: watch::Receiver<bool>,
    renewer: tokio::task::JoinHandle<()>,
}

impl LeaseGuard {
    /// `Ok(None)` when another holder owns an unexpired lease.
    pub async fn acquire(
        db: &Database,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Self>, CoordinatorError> {
        let acquired = {
            let db = db.clone();
            let holder = holder.to_string();
            tokio::task::spawn_blocking(move || db.try_acquire_lease(RUN_LEASE, &holder, ttl))
                .await
                .map_err(|e| CoordinatorError::Lease(e.to_string()))?
                .map_err(|e| CoordinatorError::Lease(format!("{:#}", e)))?
        };
        if !acquired {
            return Ok(None);
        }

        let (lost_tx, lost) = watch::channel(false);
        let renewer = {
            let db = db.clone();
            let holder = holder.to_string();
            let every = (ttl / 3).max(Duration::from_millis(100));
            tokio::spawn(async move {
                let mut renewed_at = Instant::now();
                loop {
                    tokio::time::sleep(every).await;
                    let (db, h) = (db.clone(), holder.clone());
                    match tokio::task::spawn_blocking(move || db.renew_lease(RUN_LEASE, &h, ttl))
                        .await
                    {
                        Ok(Ok(true)) => {
                            renewed_at = Instant::now();
                            tracing::debug!(holder = %holder, "Run lease renewed");
                        }
                        Ok(Ok(false)) => {
                            tracing::error!(holder = %holder, "Run lease lost to another holder");
                            let _ = lost_tx.send(true);
                            break;
                        }
                        Ok(Err(e)) => tracing::warn!(error = %e, "Run lease renewal failed"),
                        Err(e) => tracing::warn!(error = %e, "Run lease renewal task failed"),
                    }
                    if renewed_at.elapsed() >= ttl {
                        tracing::error!(holder = %holder, "Run lease expired before it could be renewed");
                        let _ = lost_tx.send(true);
                        break;
                    }
                }
            })
        };

        Ok(Some(Self {
            db: db.clone(),
            holder: holder.to_string(),
            lost,
            renewer,
        }))
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Flips to `true` once this run no longer owns the lease.
    pub fn lost(&self) -> watch::Receiver<bool> {
        self.lost.clone()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.renewer.abort();
        match self.db.release_lease(RUN_LEASE, &self.holder) {
            Ok(_) => tracing::debug!(holder = %self.holder, "Run lease released"),
            Err(e) => tracing::error!(holder = %self.holder, error = %e, "Failed to release run lease"),
        }
    }
}

// ============================================================
// Per-project serialisation
// ============================================================

/// Per-project mutual-exclusion tokens, created on first use and dropped
/// from the table once nobody holds or awaits them.
#[derive(Clone, Default)]
pub struct ProjectLocks {
    locks: Arc<Mutex<HashMap<ProjectSlug, Arc<tokio::sync::Mutex<()>>>>>,
}

/// Exclusive right to merge into one project.
pub struct ProjectToken {
    slug: ProjectSlug,
    locks: ProjectLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ProjectLocks {
    /// Waits until no other holder has the project's token.
    pub async fn token(&self, slug: &ProjectSlug) -> ProjectToken {
        let lock = self
            .locks
            .lock()
            .expect("project lock table poisoned")
            .entry(slug.clone())
            .or_default()
            .clone();
        ProjectToken {
            slug: slug.clone(),
            locks: self.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Projects currently held or awaited.
    pub fn tracked(&self) -> usize {
        self.locks.lock().expect("project lock table poisoned").len()
    }
}

impl Drop for ProjectToken {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.locks.locks.lock().expect("project lock table poisoned");
        // Waiters hold a clone, so a unique reference means nobody is queued
        if table
            .get(&self.slug)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.slug);
        }
    }
}

// ============================================================
// Coordinator
// ============================================================

pub struct RunCoordinator {
    engine: EpicMergeEngine,
    mailbox: Arc<dyn Mailbox>,
    leases: Database,
    journal: Arc<dyn ObjectStore>,
    replier: Option<Arc<dyn Replier>>,
    parser: RequirementParser,
    locks: ProjectLocks,
    options: CoordinatorOptions,
}

/// Requirements that must be merged one after another.
struct Group {
    slug: Option<ProjectSlug>,
    requirements: Vec<Requirement>,
}

impl RunCoordinator {
    pub fn new(
        engine: EpicMergeEngine,
        mailbox: Arc<dyn Mailbox>,
        leases: Database,
        journal: Arc<dyn ObjectStore>,
        options: CoordinatorOptions,
    ) -> Result<Self, CoordinatorError> {
        Ok(Self {
            parser: RequirementParser::new(&options.subject_prefix)?,
            engine,
            mailbox,
            leases,
            journal,
            replier: None,
            locks: ProjectLocks::default(),
            options,
        })
    }

    /// Acknowledge each incorporated requirement to its sender.
    pub fn with_replier(mut self, replier: Arc<dyn Replier>) -> Self {
        self.replier = Some(replier);
        self
    }

    pub fn project_locks(&self) -> &ProjectLocks {
        &self.locks
    }

    /// One scheduled run. Flipping `shutdown` to `true` lets in-flight merges
    /// finish and defers everything not yet started; losing the run lease
    /// does the same.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunReport, CoordinatorError> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_inner(run_id, shutdown).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunReport, CoordinatorError> {
        let started_at = Utc::now();
        let holder = format!("{}:{}", std::process::id(), run_id);

        let Some(guard) =
            LeaseGuard::acquire(&self.leases, &holder, self.options.lease_ttl).await?
        else {
            tracing::info!("Another run holds the lease, skipping");
            return Ok(RunReport::skipped(run_id, started_at));
        };
        tracing::info!(holder = guard.holder(), "Run started");
        let lease_lost = guard.lost();

        let messages = match tokio::time::timeout(
            self.options.call_timeout,
            self.mailbox.fetch_unseen(),
        )
        .await
        .map_err(|_| MailboxError::Timeout(self.options.call_timeout))
        .and_then(|fetched| fetched)
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!(error = %e, "Could not read mailbox, aborting run");
                let report = RunReport {
                    run_id,
                    status: RunStatus::Aborted,
                    started_at,
                    finished_at: Utc::now(),
                    entries: Vec::new(),
                    error: Some(e.to_string()),
                };
                self.write_journal(&report).await;
                return Ok(report);
            }
        };

        let requirements: Vec<Requirement> = messages
            .iter()
            .filter_map(|message| {
                let parsed = self.parser.parse(message);
                if parsed.is_none() {
                    tracing::debug!(message_id = %message.message_id, subject = %message.subject, "Ignoring message without requirement subject");
                }
                parsed
            })
            .collect();
        tracing::info!(
            fetched = messages.len(),
            requirements = requirements.len(),
            "Discovered requirements"
        );

        let mut entries = self
            .merge_all(group(requirements), shutdown.clone(), lease_lost.clone())
            .await;
        entries.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });

        let lost = *lease_lost.borrow();
        let interrupted = *shutdown.borrow()
            || lost
            || entries.iter().any(|e| e.result == EntryResult::Deferred);
        let report = RunReport {
            run_id,
            status: if interrupted {
                RunStatus::Interrupted
            } else {
                RunStatus::Completed
            },
            started_at,
            finished_at: Utc::now(),
            entries,
            error: lost.then(|| "run lease lost to another holder".to_string()),
        };

        log_summary(&report);
        self.write_journal(&report).await;
        drop(guard);
        Ok(report)
    }

    async fn merge_all(
        &self,
        groups: Vec<Group>,
        shutdown: watch::Receiver<bool>,
        lease_lost: watch::Receiver<bool>,
    ) -> Vec<ReportEntry> {
        let permits = Arc::new(Semaphore::new(self.options.max_concurrent_projects));
        let mut tasks = JoinSet::new();

        for group in groups {
            let engine = self.engine.clone();
            let mailbox = self.mailbox.clone();
            let replier = self.replier.clone();
            let locks = self.locks.clone();
            let permits = permits.clone();
            let shutdown = shutdown.clone();
            let lease_lost = lease_lost.clone();
            let call_timeout = self.options.call_timeout;

            tasks.spawn(
                async move {
                    let _permit = permits.acquire_owned().await;
                    let _token = match &group.slug {
                        Some(slug) => Some(locks.token(slug).await),
                        None => None,
                    };

                    let mut entries = Vec::with_capacity(group.requirements.len());
                    for requirement in group.requirements {
                        let project = requirement.slug().ok();
                        let stop = if *shutdown.borrow() {
                            Some("shutting down")
                        } else if *lease_lost.borrow() {
                            Some("run lease lost")
                        } else {
                            None
                        };
                        if let Some(reason) = stop {
                            tracing::info!(message_id = %requirement.message_id, reason, "Deferring requirement");
                            entries.push(ReportEntry {
                                message_id: requirement.message_id,
                                project,
                                received_at: requirement.received_at,
                                result: EntryResult::Deferred,
                                marked_seen: false,
                                replied: false,
                            });
                            continue;
                        }

                        let outcome = engine.merge(&requirement).await;
                        let marked_seen = outcome.marks_seen()
                            && mark_seen(mailbox.as_ref(), &requirement.message_id, call_timeout)
                                .await;
                        let replied = match (&replier, &outcome) {
                            (Some(replier), MergeOutcome::Incorporated { project, .. }) => {
                                acknowledge(replier.as_ref(), &engine, project, &requirement, call_timeout)
                                    .await
                            }
                            _ => false,
                        };
                        entries.push(ReportEntry {
                            message_id: requirement.message_id,
                            project,
                            received_at: requirement.received_at,
                            result: EntryResult::Merged(outcome),
                            marked_seen,
                            replied,
                        });
                    }
                    entries
                }
                .in_current_span(),
            );
        }

        let mut entries = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(group_entries) => entries.extend(group_entries),
                Err(e) => tracing::error!(error = %e, "Project worker failed"),
            }
        }
        entries
    }

    /// Best effort: a journal failure is logged and never fails the run.
    async fn write_journal(&self, report: &RunReport) {
        let Some(bucket) = &self.options.journal_bucket else {
            return;
        };
        let key = journal_key(&report.run_id, report.started_at);

        let result: Result<(), StoreError> = async {
            let body = serde_json::to_vec_pretty(report).map_err(|e| StoreError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            let limit = self.options.call_timeout;
            with_timeout(limit, self.journal.create_bucket(bucket)).await?;
            with_timeout(
                limit,
                self.journal
                    .put_object(bucket, &key, ObjectWrite::new(body, JSON)),
            )
            .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => tracing::debug!(bucket = %bucket, key = %key, "Run journal written"),
            Err(e) => tracing::warn!(bucket = %bucket, key = %key, error = %e, "Could not write run journal"),
        }
    }
}

/// `runs/<YYYY-MM-DD>/<run-id>.json`
pub fn journal_key(run_id: &str, started_at: DateTime<Utc>) -> String {
    format!("runs/{}/{}.json", started_at.format("%Y-%m-%d"), run_id)
}

/// Group by project, earliest first within a project. Requirements whose
/// title yields no slug are merged on their own so they fail individually.
fn group(requirements: Vec<Requirement>) -> Vec<Group> {
    let mut by_slug: BTreeMap<ProjectSlug, Vec<Requirement>> = BTreeMap::new();
    let mut groups = Vec::new();

    for requirement in requirements {
        match requirement.slug() {
            Ok(slug) => by_slug.entry(slug).or_default().push(requirement),
            Err(_) => groups.push(Group {
                slug: None,
                requirements: vec![requirement],
            }),
        }
    }

    for (slug, mut requirements) in by_slug {
        requirements.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        groups.push(Group {
            slug: Some(slug),
            requirements,
        });
    }
    groups
}

async fn mark_seen(mailbox: &dyn Mailbox, message_id: &str, limit: Duration) -> bool {
    let result = tokio::time::timeout(limit, mailbox.mark_seen(message_id))
        .await
        .map_err(|_| MailboxError::Timeout(limit))
        .and_then(|marked| marked);
    match result {
        Ok(()) => true,
        Err(e) => {
            // Next run finds the ledger entry and reports AlreadyIncorporated
            tracing::warn!(message_id, error = %e, "Could not mark message seen");
            false
        }
    }
}

/// Best effort: a missing sender or failed delivery is logged and leaves the
/// outcome and the seen flag untouched.
async fn acknowledge(
    replier: &dyn Replier,
    engine: &EpicMergeEngine,
    project: &ProjectSlug,
    requirement: &Requirement,
    limit: Duration,
) -> bool {
    if requirement.reply_to().is_none() {
        tracing::debug!(message_id = %requirement.message_id, "No sender address, skipping reply");
        return false;
    }

    let epic = match engine.project_store(project.clone()).get_epic().await {
        Ok(Some(epic)) => epic,
        Ok(None) => {
            tracing::warn!(message_id = %requirement.message_id, project = %project, "No epic to attach, skipping reply");
            return false;
        }
        Err(e) => {
            tracing::warn!(message_id = %requirement.message_id, project = %project, error = %e, "Could not read epic for reply");
            return false;
        }
    };
    let Some(reply) = Reply::acknowledgement(requirement, &epic) else {
        return false;
    };

    let result = tokio::time::timeout(limit, replier.send(&reply))
        .await
        .map_err(|_| ReplyError::Timeout(limit))
        .and_then(|sent| sent);
    match result {
        Ok(()) => {
            tracing::info!(message_id = %requirement.message_id, recipient = %reply.recipient, project = %project, "Reply sent");
            true
        }
        Err(e) => {
            tracing::error!(message_id = %requirement.message_id, recipient = %reply.recipient, project = %project, error = %e, "Reply failed");
            false
        }
    }
}

fn log_summary(report: &RunReport) {
    let retryable = report.retryable_failures();
    let rejected = report.rejections();
    tracing::info!(
        status = ?report.status,
        incorporated = report.incorporated(),
        already_incorporated = report.already_incorporated(),
        retryable,
        rejected,
        deferred = report.deferred(),
        replied = report.replied(),
        "Run finished"
    );
    if retryable > 0 {
        tracing::warn!(count = retryable, "Requirements left unseen for the next run");
    }
    if rejected > 0 {
        tracing::error!(count = rejected, "Requirements rejected, operator attention required");
    }
}
