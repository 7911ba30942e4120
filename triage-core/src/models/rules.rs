use serde::{Deserialize, Serialize};

use super::requirement::Requirement;

/// Built-in rules every generation starts from.
pub const BASE_RULES: &str = include_str!("../../rules/base-rules.md");

/// Describes the tagged email body so generators can interpret each section.
pub const EMAIL_FORMAT_RULES: &str = include_str!("../../rules/email-format.md");

/// Where the effective rules for a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    /// Attached to the requirement being merged.
    Attached,
    /// Previously stored for the project.
    Stored,
    /// Built-in base rules.
    Base,
}

impl RuleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attached => "attached",
            Self::Stored => "stored",
            Self::Base => "base",
        }
    }
}

/// Markdown rules text plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub source: RuleSource,
    pub text: String,
}

impl RuleSet {
    pub fn base() -> Self {
        Self {
            source: RuleSource::Base,
            text: BASE_RULES.to_string(),
        }
    }

    /// Project-specific rules that extend the base rules.
    pub fn is_extension(&self) -> bool {
        self.source != RuleSource::Base
    }
}

/// Result of rule resolution for one requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRules {
    pub effective: RuleSet,
    /// The effective rules must become the project's stored rules once the
    /// merge commits.
    pub should_persist: bool,
}

/// First match wins: attachment, then stored rules, then the base rules.
///
/// Blank attachments and blank stored rules count as absent.
pub fn resolve(requirement: &Requirement, stored: Option<String>) -> ResolvedRules {
    if let Some(attached) = requirement.attachment() {
        return ResolvedRules {
            effective: RuleSet {
                source: RuleSource::Attached,
                text: attached.to_string(),
            },
            should_persist: true,
        };
    }

    match stored.filter(|text| !text.trim().is_empty()) {
        Some(text) => ResolvedRules {
            effective: RuleSet {
                source: RuleSource::Stored,
                text,
            },
            should_persist: false,
        },
        None => ResolvedRules {
            effective: RuleSet::base(),
            should_persist: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement() -> Requirement {
        Requirement::new("<1@mail>", "Project Phoenix", "MVP", "tracks fitness goals")
    }

    #[test]
    fn falls_back_to_base_rules_without_prior_state() {
        let resolved = resolve(&requirement(), None);
        assert_eq!(resolved.effective, RuleSet::base());
        assert!(!resolved.should_persist);
    }

    #[test]
    fn uses_stored_rules_unchanged_without_persisting() {
        let resolved = resolve(&requirement(), Some("Use CQRS".to_string()));
        assert_eq!(resolved.effective.source, RuleSource::Stored);
        assert_eq!(resolved.effective.text, "Use CQRS");
        assert!(!resolved.should_persist);
    }

    #[test]
    fn attachment_overrides_stored_rules_and_persists() {
        let req = requirement().with_attached_rules("Use hexagonal architecture");
        let resolved = resolve(&req, Some("Use CQRS".to_string()));
        assert_eq!(resolved.effective.source, RuleSource::Attached);
        assert_eq!(resolved.effective.text, "Use hexagonal architecture");
        assert!(resolved.should_persist);
    }

    #[test]
    fn blank_stored_rules_degrade_to_base() {
        let resolved = resolve(&requirement(), Some("\n\n".to_string()));
        assert_eq!(resolved.effective.source, RuleSource::Base);
    }

    #[test]
    fn base_rules_are_never_empty() {
        assert!(!BASE_RULES.trim().is_empty());
        assert!(!RuleSet::base().is_extension());
    }
}
