use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TriageError;

/// A normalized, bucket-safe project key.
///
/// Derived from the raw project title in the email subject: lower-case,
/// characters outside `[a-z0-9- ]` stripped, whitespace runs collapsed to a
/// single hyphen, leading and trailing hyphens trimmed. `"Image Displayer"` and
/// `"image-displayer"` resolve to the same project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectSlug(String);

impl ProjectSlug {
    pub fn from_title(title: &str) -> Result<Self, TriageError> {
        let kept: String = title
            .to_lowercase()
            .chars()
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | ' '))
            .collect();

        let joined = kept
            .split(' ')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        let slug = joined.trim_matches('-');

        if slug.is_empty() {
            return Err(TriageError::InvalidProjectTitle(format!(
                "{:?} contains no usable characters",
                title
            )));
        }

        Ok(Self(slug.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fill a bucket name template such as `jarvis-{project_slug}`.
    pub fn bucket_name(&self, template: &str) -> String {
        template.replace("{project_slug}", &self.0)
    }
}

impl fmt::Display for ProjectSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProjectSlug {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_title(s)
    }
}

impl AsRef<str> for ProjectSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
