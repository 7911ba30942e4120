use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{InboundMessage, Mailbox, MailboxError};

const SEEN_DIR: &str = "seen";

/// Mailbox backed by a directory of JSON message files.
///
/// Unseen messages are the `*.json` files directly in the directory; marking
/// a message seen moves its file into `seen/`.
pub struct SpoolMailbox {
    dir: PathBuf,
    paths: Mutex<HashMap<String, PathBuf>>,
}

impl SpoolMailbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn remember(&self, message_id: &str, path: PathBuf) {
        self.paths
            .lock()
            .expect("spool index poisoned")
            .insert(message_id.to_string(), path);
    }

    fn path_for(&self, message_id: &str) -> Option<PathBuf> {
        self.paths
            .lock()
            .expect("spool index poisoned")
            .get(message_id)
            .cloned()
    }
}

#[async_trait]
impl Mailbox for SpoolMailbox {
    async fn fetch_unseen(&self) -> Result<Vec<InboundMessage>, MailboxError> {
        if !tokio::fs::try_exists(&self.dir).await? {
            tracing::debug!(dir = %self.dir.display(), "Spool directory does not exist yet");
            return Ok(Vec::new());
        }

        let mut messages = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }

            let raw = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<InboundMessage>(&raw) {
                Ok(message) => {
                    self.remember(&message.message_id, path);
                    messages.push(message);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping malformed spool message");
                }
            }
        }

        messages.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        tracing::debug!(dir = %self.dir.display(), count = messages.len(), "Fetched unseen messages");
        Ok(messages)
    }

    async fn mark_seen(&self, message_id: &str) -> Result<(), MailboxError> {
        let path = self
            .path_for(message_id)
            .ok_or_else(|| MailboxError::UnknownMessage(message_id.to_string()))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| MailboxError::UnknownMessage(message_id.to_string()))?;

        let seen = self.dir.join(SEEN_DIR);
        tokio::fs::create_dir_all(&seen).await?;
        tokio::fs::rename(&path, seen.join(file_name)).await?;
        self.paths
            .lock()
            .expect("spool index poisoned")
            .remove(message_id);

        tracing::debug!(message_id, "Marked message seen");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn write(dir: &Path, name: &str, id: &str, minute: u32) {
        let message = InboundMessage {
            message_id: id.to_string(),
            sender: Some("pm@example.com".to_string()),
            subject: "[JARVIS]-[Phoenix]".to_string(),
            body: "[title]\nT\n[idea]\nI".to_string(),
            received_at: Utc.with_ymd_and_hms(2026, 1, 1, 9, minute, 0).unwrap(),
            attachments: Vec::new(),
        };
        std::fs::write(dir.join(name), serde_json::to_vec(&message).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn fetches_in_arrival_order_and_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.json", "<late>", 30);
        write(dir.path(), "a.json", "<early>", 5);
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        let mailbox = SpoolMailbox::new(dir.path());
        let ids: Vec<String> = mailbox
            .fetch_unseen()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec!["<early>", "<late>"]);
    }

    #[tokio::test]
    async fn mark_seen_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", "<m1>", 0);

        let mailbox = SpoolMailbox::new(dir.path());
        assert_eq!(mailbox.fetch_unseen().await.unwrap().len(), 1);
        mailbox.mark_seen("<m1>").await.unwrap();

        assert!(dir.path().join("seen").join("a.json").exists());
        assert!(mailbox.fetch_unseen().await.unwrap().is_empty());
        assert!(matches!(
            mailbox.mark_seen("<m1>").await,
            Err(MailboxError::UnknownMessage(_))
        ));
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = SpoolMailbox::new(dir.path().join("nope"));
        assert!(mailbox.fetch_unseen().await.unwrap().is_empty());
    }
}
