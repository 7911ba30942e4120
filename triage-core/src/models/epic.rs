use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::project::ProjectSlug;

/// The current epic for a project.
///
/// Exactly one current document exists per project; a new version overwrites
/// the old one. `file_id` follows the date-derived naming scheme
/// (`epic_<short-description>_<YYYY-MM-DD>`) and `etag` is the SHA-256 of the
/// content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpicDocument {
    pub slug: ProjectSlug,
    pub content: String,
    pub file_id: String,
    pub etag: String,
    /// Message id of the requirement whose merge produced this version.
    pub source_message_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EpicDocument {
    pub fn new(
        slug: ProjectSlug,
        project_title: &str,
        content: String,
        source_message_id: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            file_id: epic_file_id(project_title, updated_at.date_naive()),
            etag: content_etag(content.as_bytes()),
            slug,
            content,
            source_message_id,
            updated_at,
        }
    }

    pub fn reference(&self) -> EpicRef {
        EpicRef {
            slug: self.slug.clone(),
            file_id: self.file_id.clone(),
            etag: self.etag.clone(),
        }
    }
}

/// Lightweight pointer to a committed epic, returned in merge outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpicRef {
    pub slug: ProjectSlug,
    pub file_id: String,
    pub etag: String,
}

/// `epic_<first four words>_<date>`; falls back to `epic` when the title has no words.
pub fn epic_file_id(project_title: &str, date: NaiveDate) -> String {
    let cleaned: String = project_title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().take(4).collect();
    let description = if words.is_empty() {
        "epic".to_string()
    } else {
        words.join("-")
    };
    format!("epic_{}_{}", description, date.format("%Y-%m-%d"))
}

pub fn content_etag(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}
