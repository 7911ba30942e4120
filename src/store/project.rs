use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use triage_core::models::{EpicDocument, ProjectSlug};

use super::{
    with_timeout, NotificationConfig, NotificationTransport, ObjectMeta, ObjectStore,
    ObjectWrite, StoreError, MARKDOWN,
};

/// Key of the current epic in a project bucket.
pub const EPIC_KEY: &str = "epics/epic.md";
pub const EPIC_PREFIX: &str = "epics/";
pub const RULES_KEY: &str = "rules/project-extension-rules.md";
/// Where the date-named scheme kept extension rules, beside the epics.
pub const LEGACY_RULES_KEY: &str = "epics/project-extension-rules.md";
pub const LEDGER_PREFIX: &str = "ledger/";

const META_FILE_ID: &str = "file-id";
const META_SOURCE_MESSAGE_ID: &str = "source-message-id";

/// Bucket naming, notification target and call bound shared by every project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub bucket_template: String,
    pub notification: NotificationTransport,
    pub call_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            bucket_template: "jarvis-{project_slug}".to_string(),
            notification: NotificationTransport::Poll,
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// What [`ProjectStore::ensure_project_initialized`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProjectInit {
    pub bucket_created: bool,
    pub notification_registered: bool,
}

/// One project's namespace: the current epic, the current extension rules and
/// (through [`crate::ledger::Ledger`]) the incorporation ledger.
#[derive(Clone)]
pub struct ProjectStore {
    store: Arc<dyn ObjectStore>,
    slug: ProjectSlug,
    bucket: String,
    options: StoreOptions,
}

impl ProjectStore {
    pub fn new(store: Arc<dyn ObjectStore>, slug: ProjectSlug, options: &StoreOptions) -> Self {
        Self {
            bucket: slug.bucket_name(&options.bucket_template),
            store,
            slug,
            options: options.clone(),
        }
    }

    pub fn slug(&self) -> &ProjectSlug {
        &self.slug
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Create the bucket and register the epic notification, each only if missing.
    ///
    /// Safe on every run. Registration is best-effort: a failure is logged
    /// and does not fail the merge.
    pub async fn ensure_project_initialized(&self) -> Result<ProjectInit, StoreError> {
        let limit = self.options.call_timeout;
        let mut init = ProjectInit::default();

        if !with_timeout(limit, self.store.head_bucket(&self.bucket)).await? {
            // A concurrent creator makes this return false, which is fine
            init.bucket_created = with_timeout(limit, self.store.create_bucket(&self.bucket)).await?;
            if init.bucket_created {
                tracing::info!(project = %self.slug, bucket = %self.bucket, "Created project bucket");
            }
        }

        let desired = NotificationConfig::epics(&self.bucket, self.options.notification.clone());
        match with_timeout(limit, self.store.get_notification(&self.bucket)).await {
            Ok(Some(existing)) if existing == desired => {
                tracing::debug!(bucket = %self.bucket, "Epic notification already registered");
            }
            Ok(_) => {
                match with_timeout(limit, self.store.put_notification(&self.bucket, &desired))
                    .await
                {
                    Ok(()) => {
                        init.notification_registered = true;
                        tracing::info!(
                            bucket = %self.bucket,
                            target = %desired.id,
                            prefix = %desired.prefix,
                            "Registered epic notification"
                        );
                    }
                    Err(e) => {
                        tracing::error!(bucket = %self.bucket, error = %e, "Notification registration failed");
                    }
                }
            }
            Err(e) => {
                tracing::error!(bucket = %self.bucket, error = %e, "Could not read notification config");
            }
        }

        Ok(init)
    }

    /// The current epic, or `None` for a new project.
    ///
    /// Buckets written by the date-named scheme have no `epics/epic.md`; the
    /// newest `epics/<description>_<YYYY-MM-DD>.md` object is used instead and
    /// is superseded by the next commit.
    pub async fn get_epic(&self) -> Result<Option<EpicDocument>, StoreError> {
        let limit = self.options.call_timeout;
        let mut object = with_timeout(limit, self.store.get_object(&self.bucket, EPIC_KEY)).await?;

        if object.is_none() {
            let legacy = with_timeout(limit, self.store.list_objects(&self.bucket, EPIC_PREFIX))
                .await?
                .into_iter()
                .filter_map(|meta| dated_epic(&meta.key).map(|date| (date, meta.key)))
                .max();
            if let Some((_, key)) = legacy {
                tracing::debug!(project = %self.slug, key = %key, "Using legacy epic object");
                object = with_timeout(limit, self.store.get_object(&self.bucket, &key)).await?;
            }
        }

        let Some(object) = object else {
            return Ok(None);
        };

        let file_id = object.metadata.get(META_FILE_ID).cloned().unwrap_or_else(|| {
            object
                .key
                .trim_start_matches(EPIC_PREFIX)
                .trim_end_matches(".md")
                .to_string()
        });
        let source_message_id = object.metadata.get(META_SOURCE_MESSAGE_ID).cloned();
        let etag = object.etag.clone();
        let updated_at = object.last_modified;
        let content = object.into_text()?;

        Ok(Some(EpicDocument {
            slug: self.slug.clone(),
            content,
            file_id,
            etag,
            source_message_id,
            updated_at,
        }))
    }

    pub async fn put_epic(&self, doc: &EpicDocument) -> Result<ObjectMeta, StoreError> {
        let mut write = ObjectWrite::new(doc.content.as_bytes(), MARKDOWN)
            .with_metadata(META_FILE_ID, doc.file_id.as_str());
        if let Some(message_id) = &doc.source_message_id {
            write = write.with_metadata(META_SOURCE_MESSAGE_ID, message_id.as_str());
        }

        let meta = with_timeout(
            self.options.call_timeout,
            self.store.put_object(&self.bucket, EPIC_KEY, write),
        )
        .await?;
        tracing::info!(
            project = %self.slug,
            bucket = %self.bucket,
            key = EPIC_KEY,
            file_id = %doc.file_id,
            "Epic written"
        );
        Ok(meta)
    }

    /// Stored extension rules, falling back to the date-named scheme's key.
    pub async fn get_rules(&self) -> Result<Option<String>, StoreError> {
        let limit = self.options.call_timeout;
        let mut object = with_timeout(limit, self.store.get_object(&self.bucket, RULES_KEY)).await?;
        if object.is_none() {
            object = with_timeout(limit, self.store.get_object(&self.bucket, LEGACY_RULES_KEY)).await?;
            if object.is_some() {
                tracing::debug!(project = %self.slug, key = LEGACY_RULES_KEY, "Using legacy extension rules");
            }
        }
        object.map(|object| object.into_text()).transpose()
    }

    pub async fn put_rules(&self, rules: &str) -> Result<ObjectMeta, StoreError> {
        let meta = with_timeout(
            self.options.call_timeout,
            self.store
                .put_object(&self.bucket, RULES_KEY, ObjectWrite::new(rules.as_bytes(), MARKDOWN)),
        )
        .await?;
        tracing::info!(project = %self.slug, key = RULES_KEY, length = rules.len(), "Extension rules written");
        Ok(meta)
    }
}

/// Date of an `epics/<description>_<YYYY-MM-DD>.md` key; `None` for any other key.
fn dated_epic(key: &str) -> Option<NaiveDate> {
    let stem = key.strip_prefix(EPIC_PREFIX)?.strip_suffix(".md")?;
    let (description, date) = stem.rsplit_once('_')?;
    if description.is_empty() || description.contains('/') {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_date_named_keys_are_legacy_epics() {
        assert_eq!(
            dated_epic("epics/fitness-tracker_2025-02-01.md"),
            NaiveDate::from_ymd_opt(2025, 2, 1)
        );
        assert_eq!(
            dated_epic("epics/epic_track_fitness_goals_2025-03-09.md"),
            NaiveDate::from_ymd_opt(2025, 3, 9)
        );
        assert_eq!(dated_epic(LEGACY_RULES_KEY), None);
        assert_eq!(dated_epic(EPIC_KEY), None);
        assert_eq!(dated_epic("epics/notes_draft.md"), None);
        assert_eq!(dated_epic("epics/old/fitness_2025-02-01.md"), None);
    }
}
