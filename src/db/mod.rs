mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::store::{
    BucketInfo, Lease, NotificationConfig, ObjectEvent, ObjectMeta, ObjectWrite, StoredObject,
    OBJECT_CREATED_PUT,
};
use triage_core::models::content_etag;

/// SQLite-backed bucket/object storage, notification outbox and run leases.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "epic-triage")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(dirs.data_dir().join("triage.db"))
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Bucket operations
    // ============================================================

    pub fn bucket_exists(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM buckets WHERE name = ?",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Returns `false` when the bucket already existed.
    pub fn create_bucket(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?, ?)",
            (name, Utc::now().to_rfc3339()),
        )?;
        Ok(rows > 0)
    }

    pub fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare("SELECT name, created_at FROM buckets ORDER BY name")?;

        let buckets = stmt
            .query_map([], |row| {
                Ok(BucketInfo {
                    name: row.get(0)?,
                    created_at: parse_datetime(row.get::<_, String>(1)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(buckets)
    }

    // ============================================================
    // Object operations
    // ============================================================

    pub fn get_object(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT bucket, key, body, content_type, etag, metadata, last_modified
             FROM objects WHERE bucket = ? AND key = ?",
        )?;

        let mut rows = stmt.query((bucket, key))?;
        if let Some(row) = rows.next()? {
            let metadata_json: String = row.get(5)?;
            Ok(Some(StoredObject {
                bucket: row.get(0)?,
                key: row.get(1)?,
                body: row.get(2)?,
                content_type: row.get(3)?,
                etag: row.get(4)?,
                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
                last_modified: parse_datetime(row.get::<_, String>(6)?),
            }))
        } else {
            Ok(None)
        }
    }

    /// Write an object in one transaction and append an outbox event when the
    /// bucket's notification config matches the key.
    pub fn put_object(&self, bucket: &str, key: &str, object: &ObjectWrite) -> Result<ObjectMeta> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now();
        let etag = content_etag(&object.body);

        let bucket_exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM buckets WHERE name = ?",
            [bucket],
            |row| row.get(0),
        )?;
        if bucket_exists == 0 {
            anyhow::bail!("Bucket not found: {}", bucket);
        }

        tx.execute(
            "INSERT INTO objects (bucket, key, body, content_type, etag, metadata, last_modified)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (bucket, key) DO UPDATE SET
                body = excluded.body,
                content_type = excluded.content_type,
                etag = excluded.etag,
                metadata = excluded.metadata,
                last_modified = excluded.last_modified",
            (
                bucket,
                key,
                &object.body,
                &object.content_type,
                &etag,
                serde_json::to_string(&object.metadata)?,
                now.to_rfc3339(),
            ),
        )?;

        let config: Option<String> = tx
            .query_row(
                "SELECT config FROM bucket_notifications WHERE bucket = ?",
                [bucket],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(config) = config {
            let config: NotificationConfig = serde_json::from_str(&config)?;
            if config.matches(OBJECT_CREATED_PUT, key) {
                tx.execute(
                    "INSERT INTO object_events (bucket, key, event, etag, target_id, created_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    (
                        bucket,
                        key,
                        OBJECT_CREATED_PUT,
                        &etag,
                        &config.id,
                        now.to_rfc3339(),
                    ),
                )?;
            }
        }

        tx.commit()?;

        Ok(ObjectMeta {
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag,
            size: object.body.len() as u64,
            last_modified: now,
        })
    }

    pub fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT bucket, key, etag, length(body), last_modified
             FROM objects
             WHERE bucket = ?1 AND substr(key, 1, length(?2)) = ?2
             ORDER BY key",
        )?;

        let objects = stmt
            .query_map((bucket, prefix), |row| {
                Ok(ObjectMeta {
                    bucket: row.get(0)?,
                    key: row.get(1)?,
                    etag: row.get(2)?,
                    size: row.get::<_, i64>(3)?.max(0) as u64,
                    last_modified: parse_datetime(row.get::<_, String>(4)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(objects)
    }

    // ============================================================
    // Notification operations
    // ============================================================

    pub fn get_notification(&self, bucket: &str) -> Result<Option<NotificationConfig>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let config: Option<String> = conn
            .query_row(
                "SELECT config FROM bucket_notifications WHERE bucket = ?",
                [bucket],
                |row| row.get(0),
            )
            .optional()?;

        config
            .map(|json| serde_json::from_str(&json).map_err(anyhow::Error::from))
            .transpose()
    }

    pub fn put_notification(&self, bucket: &str, config: &NotificationConfig) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO bucket_notifications (bucket, config, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (bucket) DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at",
            (
                bucket,
                serde_json::to_string(config)?,
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    /// Outbox events with a sequence number greater than `after`, oldest first.
    pub fn events_after(&self, after: i64, limit: usize) -> Result<Vec<ObjectEvent>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT seq, bucket, key, event, etag, target_id, created_at
             FROM object_events WHERE seq > ? ORDER BY seq LIMIT ?",
        )?;

        let events = stmt
            .query_map((after, limit as i64), |row| {
                Ok(ObjectEvent {
                    seq: row.get(0)?,
                    bucket: row.get(1)?,
                    key: row.get(2)?,
                    event: row.get(3)?,
                    etag: row.get(4)?,
                    target_id: row.get(5)?,
                    created_at: parse_datetime(row.get::<_, String>(6)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    // ============================================================
    // Run lease operations
    // ============================================================

    /// Take the named lease if it is free or expired. Re-acquiring a lease
    /// already held by `holder` extends it.
    pub fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let expires_at_ms = now_ms + ttl.as_millis() as i64;

        tx.execute(
            "DELETE FROM run_leases WHERE name = ? AND expires_at_ms <= ?",
            (name, now_ms),
        )?;
        let rows = tx.execute(
            "INSERT INTO run_leases (name, holder, acquired_at, expires_at_ms) VALUES (?, ?, ?, ?)
             ON CONFLICT (name) DO UPDATE SET expires_at_ms = excluded.expires_at_ms
             WHERE run_leases.holder = excluded.holder",
            (name, holder, now.to_rfc3339(), expires_at_ms),
        )?;
        tx.commit()?;

        Ok(rows > 0)
    }

    /// Extend a lease. Returns `false` if `holder` no longer owns it.
    pub fn renew_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let expires_at_ms = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        let rows = conn.execute(
            "UPDATE run_leases SET expires_at_ms = ? WHERE name = ? AND holder = ?",
            (expires_at_ms, name, holder),
        )?;
        Ok(rows > 0)
    }

    pub fn release_lease(&self, name: &str, holder: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "DELETE FROM run_leases WHERE name = ? AND holder = ?",
            (name, holder),
        )?;
        Ok(rows > 0)
    }

    pub fn get_lease(&self, name: &str) -> Result<Option<Lease>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.query_row(
            "SELECT name, holder, acquired_at, expires_at_ms FROM run_leases WHERE name = ?",
            [name],
            |row| {
                Ok(Lease {
                    name: row.get(0)?,
                    holder: row.get(1)?,
                    acquired_at: parse_datetime(row.get::<_, String>(2)?),
                    expires_at_ms: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

