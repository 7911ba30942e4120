//! Append-only record of which requirement messages are in each project's epic.
//!
//! Entries live next to the epic, one object per message id under `ledger/`.
//! Merges are serialised per project, so a read-then-write here never races
//! another writer for the same key.

use std::sync::Arc;

use triage_core::models::{content_etag, LedgerEntry, ProjectSlug};

use crate::store::{
    with_timeout, ObjectStore, ObjectWrite, StoreError, StoreOptions, JSON, LEDGER_PREFIX,
};

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn ObjectStore>,
    options: StoreOptions,
}

impl Ledger {
    pub fn new(store: Arc<dyn ObjectStore>, options: StoreOptions) -> Self {
        Self { store, options }
    }

    /// Message ids are arbitrary header values; keys use their SHA-256.
    pub fn entry_key(message_id: &str) -> String {
        format!("{}{}.json", LEDGER_PREFIX, content_etag(message_id.as_bytes()))
    }

    fn bucket(&self, project: &ProjectSlug) -> String {
        project.bucket_name(&self.options.bucket_template)
    }

    pub async fn get(
        &self,
        project: &ProjectSlug,
        message_id: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let key = Self::entry_key(message_id);
        let object = with_timeout(
            self.options.call_timeout,
            self.store.get_object(&self.bucket(project), &key),
        )
        .await?;

        object
            .map(|object| {
                serde_json::from_slice::<LedgerEntry>(&object.body).map_err(|e| {
                    StoreError::Corrupt {
                        key: key.clone(),
                        reason: e.to_string(),
                    }
                })
            })
            .transpose()
    }

    pub async fn has_incorporated(
        &self,
        project: &ProjectSlug,
        message_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .get(project, message_id)
            .await?
            .is_some_and(|entry| entry.is_incorporated()))
    }

    /// Record the message as incorporated. A second call for the same key is
    /// a no-op that returns the original entry.
    pub async fn mark_incorporated(
        &self,
        project: &ProjectSlug,
        message_id: &str,
        epic_etag: Option<String>,
    ) -> Result<LedgerEntry, StoreError> {
        if let Some(existing) = self.get(project, message_id).await? {
            if existing.is_incorporated() {
                tracing::debug!(project = %project, message_id, "Ledger entry already incorporated");
                return Ok(existing);
            }
        }

        let entry = LedgerEntry::incorporated(project.clone(), message_id, epic_etag);
        self.write(project, &entry).await?;
        tracing::debug!(project = %project, message_id, "Ledger marked incorporated");
        Ok(entry)
    }

    /// Record a non-retryable rejection. Never overwrites an incorporated entry.
    pub async fn mark_failed(
        &self,
        project: &ProjectSlug,
        message_id: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        if let Some(existing) = self.get(project, message_id).await? {
            if existing.is_incorporated() {
                return Ok(());
            }
        }

        let entry = LedgerEntry::failed(project.clone(), message_id, error);
        self.write(project, &entry).await
    }

    /// Every entry for the project, oldest first.
    pub async fn entries(&self, project: &ProjectSlug) -> Result<Vec<LedgerEntry>, StoreError> {
        let bucket = self.bucket(project);
        let limit = self.options.call_timeout;
        let listed = with_timeout(limit, self.store.list_objects(&bucket, LEDGER_PREFIX)).await?;

        let mut entries = Vec::with_capacity(listed.len());
        for meta in listed {
            let Some(object) = with_timeout(limit, self.store.get_object(&bucket, &meta.key)).await?
            else {
                continue;
            };
            match serde_json::from_slice::<LedgerEntry>(&object.body) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(bucket = %bucket, key = %meta.key, error = %e, "Skipping corrupt ledger entry");
                }
            }
        }

        entries.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(entries)
    }

    async fn write(&self, project: &ProjectSlug, entry: &LedgerEntry) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(entry).map_err(|e| StoreError::Corrupt {
            key: Self::entry_key(&entry.message_id),
            reason: e.to_string(),
        })?;
        with_timeout(
            self.options.call_timeout,
            self.store.put_object(
                &self.bucket(project),
                &Self::entry_key(&entry.message_id),
                ObjectWrite::new(body, JSON).with_metadata("outcome", entry.outcome.as_str()),
            ),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_keys_are_stable_and_path_safe() {
        let key = Ledger::entry_key("<CAF=abc/def@mail.example.com>");
        assert_eq!(key, Ledger::entry_key("<CAF=abc/def@mail.example.com>"));
        assert!(key.starts_with("ledger/"));
        assert!(key.ends_with(".json"));
        assert!(!key.trim_start_matches("ledger/").contains('/'));
    }
}
