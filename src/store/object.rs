use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Event name recorded for every matching put.
pub const OBJECT_CREATED_PUT: &str = "s3:ObjectCreated:Put";

pub const MARKDOWN: &str = "text/markdown; charset=utf-8";
pub const JSON: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Body and headers for a put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectWrite {
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
}

impl ObjectWrite {
    pub fn new(body: impl Into<Vec<u8>>, content_type: &str) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A full object as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    /// SHA-256 of the body, hex encoded.
    pub etag: String,
    pub metadata: BTreeMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    pub fn into_text(self) -> Result<String, StoreError> {
        String::from_utf8(self.body).map_err(|_| StoreError::Corrupt {
            key: self.key,
            reason: "body is not valid UTF-8".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// How downstream consumers learn about new epics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationTransport {
    /// Pushed to a webhook through the queue target `queue_arn`.
    Webhook { url: String, queue_arn: String },
    /// Consumers poll the event outbox.
    Poll,
}

/// Per-bucket notification registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub id: String,
    pub events: Vec<String>,
    pub prefix: String,
    pub suffix: String,
    pub transport: NotificationTransport,
}

impl NotificationConfig {
    /// Fires on every put of a Markdown object under `epics/`.
    pub fn epics(bucket: &str, transport: NotificationTransport) -> Self {
        Self {
            id: format!("{}-epics-put", bucket),
            events: vec![OBJECT_CREATED_PUT.to_string()],
            prefix: "epics/".to_string(),
            suffix: ".md".to_string(),
            transport,
        }
    }

    pub fn matches(&self, event: &str, key: &str) -> bool {
        self.events.iter().any(|e| e == event)
            && key.starts_with(&self.prefix)
            && key.ends_with(&self.suffix)
    }
}

/// An outbox row written when a put matched a notification config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEvent {
    pub seq: i64,
    pub bucket: String,
    pub key: String,
    pub event: String,
    pub etag: String,
    pub target_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epic_notification_matches_only_markdown_under_epics() {
        let config = NotificationConfig::epics("jarvis-phoenix", NotificationTransport::Poll);
        assert_eq!(config.id, "jarvis-phoenix-epics-put");
        assert!(config.matches(OBJECT_CREATED_PUT, "epics/epic.md"));
        assert!(!config.matches(OBJECT_CREATED_PUT, "rules/project-extension-rules.md"));
        assert!(!config.matches(OBJECT_CREATED_PUT, "epics/notes.txt"));
        assert!(!config.matches("s3:ObjectRemoved:Delete", "epics/epic.md"));
    }

    #[test]
    fn invalid_utf8_is_reported_as_corrupt() {
        let object = StoredObject {
            bucket: "b".into(),
            key: "epics/epic.md".into(),
            body: vec![0xff, 0xfe],
            content_type: MARKDOWN.into(),
            etag: String::new(),
            metadata: BTreeMap::new(),
            last_modified: Utc::now(),
        };
        assert!(matches!(object.into_text(), Err(StoreError::Corrupt { .. })));
    }
}
