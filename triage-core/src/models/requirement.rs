use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::project::ProjectSlug;
use crate::error::TriageError;

/// One parsed inbound requirement email.
///
/// `message_id` is unique and stable across mailbox fetches; it is the ledger
/// key that makes incorporation idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub message_id: String,
    /// Raw project title from the subject, e.g. `Project Phoenix`.
    pub project_title: String,
    /// Concise title from the `[title]` section.
    pub title: String,
    /// Concept description from the `[idea]` section.
    pub idea: String,
    /// Technical instructions from `[directives]`, in the order they were written.
    #[serde(default)]
    pub directives: Vec<String>,
    /// Environment variable name → description, from `[envs]`.
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    /// Content of an attached `project-extension-rules.md`, if any.
    #[serde(default)]
    pub attached_rules: Option<String>,
    /// Address the acknowledgement goes to, when the mailbox knows it.
    #[serde(default)]
    pub sender: Option<String>,
    /// Subject line as received.
    #[serde(default)]
    pub subject: String,
    pub received_at: DateTime<Utc>,
}

impl Requirement {
    pub fn new(
        message_id: impl Into<String>,
        project_title: impl Into<String>,
        title: impl Into<String>,
        idea: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            project_title: project_title.into(),
            title: title.into(),
            idea: idea.into(),
            directives: Vec::new(),
            envs: BTreeMap::new(),
            attached_rules: None,
            sender: None,
            subject: String::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_directives(mut self, directives: Vec<String>) -> Self {
        self.directives = directives;
        self
    }

    pub fn with_envs(mut self, envs: BTreeMap<String, String>) -> Self {
        self.envs = envs;
        self
    }

    pub fn with_attached_rules(mut self, rules: impl Into<String>) -> Self {
        self.attached_rules = Some(rules.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    /// Reject requirements that can never be incorporated as sent.
    pub fn validate(&self) -> Result<(), TriageError> {
        if self.message_id.trim().is_empty() {
            return Err(TriageError::InvalidRequirement(
                "message identifier is empty".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(TriageError::InvalidRequirement(
                "[title] section is missing or empty".to_string(),
            ));
        }
        if self.idea.trim().is_empty() {
            return Err(TriageError::InvalidRequirement(
                "[idea] section is missing or empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn slug(&self) -> Result<ProjectSlug, TriageError> {
        ProjectSlug::from_title(&self.project_title)
    }

    /// Sender address, or `None` when absent or blank.
    pub fn reply_to(&self) -> Option<&str> {
        self.sender
            .as_deref()
            .map(str::trim)
            .filter(|sender| !sender.is_empty())
    }

    /// Attached rules, or `None` when absent or blank.
    pub fn attachment(&self) -> Option<&str> {
        self.attached_rules
            .as_deref()
            .filter(|rules| !rules.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_title_and_idea() {
        let req = Requirement::new("<1@mail>", "Project Phoenix", "MVP", "tracks fitness goals");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rejects_blank_idea() {
        let req = Requirement::new("<1@mail>", "Project Phoenix", "MVP", "  \n ");
        assert_eq!(
            req.validate(),
            Err(TriageError::InvalidRequirement(
                "[idea] section is missing or empty".to_string()
            ))
        );
    }

    #[test]
    fn rejects_blank_title() {
        let req = Requirement::new("<1@mail>", "Project Phoenix", "", "idea");
        assert!(matches!(req.validate(), Err(TriageError::InvalidRequirement(_))));
    }

    #[test]
    fn blank_sender_has_no_reply_address() {
        let req = Requirement::new("<1@mail>", "P", "t", "i").with_sender("  ");
        assert!(req.reply_to().is_none());
        let req = req.with_sender(" pm@example.com ");
        assert_eq!(req.reply_to(), Some("pm@example.com"));
    }

    #[test]
    fn blank_attachment_counts_as_absent() {
        let req = Requirement::new("<1@mail>", "P", "t", "i").with_attached_rules("   ");
        assert!(req.attachment().is_none());
    }
}
