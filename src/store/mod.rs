//! Object-store seam.
//!
//! The merge engine only talks to [`ObjectStore`]: buckets, keyed objects and
//! per-bucket notification registration, with object-store semantics (per-key
//! last-write-wins, read-your-writes, not-found distinct from transport
//! errors). [`SqliteObjectStore`] is the bundled backend; [`ProjectStore`]
//! scopes it to one project's bucket.

mod object;
mod project;
mod sqlite;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use triage_core::TriageError;

pub use object::*;
pub use project::*;
pub use sqlite::SqliteObjectStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("corrupt object {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<StoreError> for TriageError {
    fn from(err: StoreError) -> Self {
        TriageError::StoreUnavailable(err.to_string())
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Returns `false` when the bucket already existed.
    async fn create_bucket(&self, bucket: &str) -> Result<bool, StoreError>;

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError>;

    async fn get_notification(&self, bucket: &str)
        -> Result<Option<NotificationConfig>, StoreError>;

    async fn put_notification(
        &self,
        bucket: &str,
        config: &NotificationConfig,
    ) -> Result<(), StoreError>;

    /// `Ok(None)` when the key does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Replaces the object atomically; readers see the old or the new body, never a mix.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        object: ObjectWrite,
    ) -> Result<ObjectMeta, StoreError>;

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError>;
}

/// Bound a store call; an elapsed timer counts as a transport failure.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elapsed_calls_become_timeouts() {
        let limit = Duration::from_millis(10);
        let result: Result<(), StoreError> = with_timeout(limit, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(StoreError::Timeout(limit)));
    }

    #[test]
    fn store_errors_are_retryable_triage_errors() {
        let err: TriageError = StoreError::Timeout(Duration::from_secs(1)).into();
        assert!(err.is_retryable());
    }
}
