//! Mailbox seam: where requirements come from, how they are marked seen and
//! how their senders are answered.

mod parse;
mod reply;
mod spool;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use parse::{parse_requirement, RequirementParser, RULES_ATTACHMENT};
pub use reply::{OutboxReplier, Replier, Reply, ReplyError, REPLY_ATTACHMENT};
pub use spool::SpoolMailbox;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content: String,
}

/// A raw message as delivered by the mailbox, before tag parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    /// `From` address, if the transport exposes one.
    #[serde(default)]
    pub sender: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("mailbox I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("mailbox call timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Every message not yet marked seen.
    async fn fetch_unseen(&self) -> Result<Vec<InboundMessage>, MailboxError>;

    /// Only called once the message's content is in its project's epic.
    async fn mark_seen(&self, message_id: &str) -> Result<(), MailboxError>;
}
