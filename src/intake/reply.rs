use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use triage_core::models::{EpicDocument, Requirement};

use super::Attachment;

/// Filename the current epic is attached under.
pub const REPLY_ATTACHMENT: &str = "requirements.md";

/// An acknowledgement to the sender of an incorporated requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub in_reply_to: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl Reply {
    /// `None` when the requirement carries no sender address.
    pub fn acknowledgement(requirement: &Requirement, epic: &EpicDocument) -> Option<Self> {
        let recipient = requirement.reply_to()?;
        let project = requirement.project_title.trim();
        let subject = match requirement.subject.trim() {
            "" => format!("Re: [{}]", project),
            original => format!("Re: {}", original),
        };
        let body = format!(
            "Hello,\n\n\
             Your requirements for '{}' have been merged into the project epic. \
             The current document is attached.\n",
            project
        );

        Some(Self {
            in_reply_to: requirement.message_id.clone(),
            recipient: recipient.to_string(),
            subject,
            body,
            attachments: vec![Attachment {
                filename: REPLY_ATTACHMENT.to_string(),
                content: epic.content.clone(),
            }],
        })
    }
}

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("reply I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("reply could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("reply timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound side of the mailbox. Best effort: a failed reply never changes
/// whether the requirement counts as incorporated.
#[async_trait]
pub trait Replier: Send + Sync {
    async fn send(&self, reply: &Reply) -> Result<(), ReplyError>;
}

/// Writes each reply as `<message id>.json` for a mail relay to deliver.
///
/// Files are written under a temporary name and renamed, so a relay never
/// sees a partial reply. Replying twice to one message overwrites the file.
pub struct OutboxReplier {
    dir: PathBuf,
}

impl OutboxReplier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, message_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(message_id)))
    }
}

fn file_stem(message_id: &str) -> String {
    let stem: String = message_id
        .trim_matches(|c| c == '<' || c == '>')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_matches('.');
    if stem.is_empty() {
        "reply".to_string()
    } else {
        stem.to_string()
    }
}

#[async_trait]
impl Replier for OutboxReplier {
    async fn send(&self, reply: &Reply) -> Result<(), ReplyError> {
        let body = serde_json::to_vec_pretty(reply)?;
        let path = self.path_for(&reply.in_reply_to);
        let staging = path.with_extension("json.tmp");

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, &path).await?;

        tracing::debug!(path = %path.display(), recipient = %reply.recipient, "Reply queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use triage_core::models::ProjectSlug;

    use super::*;

    fn epic() -> EpicDocument {
        EpicDocument::new(
            ProjectSlug::from_title("Project Phoenix").unwrap(),
            "Project Phoenix",
            "# Project Phoenix\n".to_string(),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn acknowledgement_needs_a_sender() {
        let req = Requirement::new("<m1@mail>", "Project Phoenix", "MVP", "tracks goals");
        assert!(Reply::acknowledgement(&req, &epic()).is_none());

        let req = req
            .with_sender("pm@example.com")
            .with_subject("[JARVIS]-[Project Phoenix] MVP");
        let reply = Reply::acknowledgement(&req, &epic()).unwrap();
        assert_eq!(reply.recipient, "pm@example.com");
        assert_eq!(reply.subject, "Re: [JARVIS]-[Project Phoenix] MVP");
        assert_eq!(reply.in_reply_to, "<m1@mail>");
        assert!(reply.body.contains("'Project Phoenix'"));
        assert_eq!(reply.attachments[0].filename, REPLY_ATTACHMENT);
        assert_eq!(reply.attachments[0].content, "# Project Phoenix\n");
    }

    #[test]
    fn message_ids_become_safe_file_names() {
        assert_eq!(file_stem("<r1@mail.example.com>"), "r1@mail.example.com");
        assert_eq!(file_stem("<../../etc/passwd>"), "_.._etc_passwd");
        assert_eq!(file_stem("<>"), "reply");
    }

    #[tokio::test]
    async fn outbox_writes_one_file_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let replier = OutboxReplier::new(dir.path().join("outbox"));
        let req = Requirement::new("<m1@mail>", "Project Phoenix", "MVP", "tracks goals")
            .with_sender("pm@example.com");
        let reply = Reply::acknowledgement(&req, &epic()).unwrap();

        replier.send(&reply).await.unwrap();
        replier.send(&reply).await.unwrap();

        let written = std::fs::read(replier.path_for("<m1@mail>")).unwrap();
        let parsed: Reply = serde_json::from_slice(&written).unwrap();
        assert_eq!(parsed, reply);
        assert_eq!(std::fs::read_dir(replier.dir()).unwrap().count(), 1);
    }
}
