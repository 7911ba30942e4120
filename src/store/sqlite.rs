use async_trait::async_trait;

use super::{
    BucketInfo, NotificationConfig, ObjectMeta, ObjectStore, ObjectWrite, StoreError,
    StoredObject,
};
use crate::db::Database;

/// [`ObjectStore`] over the local SQLite database.
///
/// Calls run on the blocking pool so a slow disk never stalls the runtime.
#[derive(Clone)]
pub struct SqliteObjectStore {
    db: Database,
}

impl SqliteObjectStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: worker failed: {}", op, e)))?
            .map_err(|e| {
                tracing::debug!(op, error = %e, "Store operation failed");
                StoreError::Unavailable(format!("{}: {:#}", op, e))
            })
    }
}

#[async_trait]
impl ObjectStore for SqliteObjectStore {
    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError> {
        let bucket = bucket.to_string();
        self.blocking("head_bucket", move |db| db.bucket_exists(&bucket))
            .await
    }

    async fn create_bucket(&self, bucket: &str) -> Result<bool, StoreError> {
        let bucket = bucket.to_string();
        self.blocking("create_bucket", move |db| db.create_bucket(&bucket))
            .await
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        self.blocking("list_buckets", |db| db.list_buckets()).await
    }

    async fn get_notification(
        &self,
        bucket: &str,
    ) -> Result<Option<NotificationConfig>, StoreError> {
        let bucket = bucket.to_string();
        self.blocking("get_notification", move |db| db.get_notification(&bucket))
            .await
    }

    async fn put_notification(
        &self,
        bucket: &str,
        config: &NotificationConfig,
    ) -> Result<(), StoreError> {
        let bucket = bucket.to_string();
        let config = config.clone();
        self.blocking("put_notification", move |db| {
            db.put_notification(&bucket, &config)
        })
        .await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let (bucket, key) = (bucket.to_string(), key.to_string());
        self.blocking("get_object", move |db| db.get_object(&bucket, &key))
            .await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        object: ObjectWrite,
    ) -> Result<ObjectMeta, StoreError> {
        let (bucket, key) = (bucket.to_string(), key.to_string());
        self.blocking("put_object", move |db| db.put_object(&bucket, &key, &object))
            .await
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let (bucket, prefix) = (bucket.to_string(), prefix.to_string());
        self.blocking("list_objects", move |db| db.list_objects(&bucket, &prefix))
            .await
    }
}
