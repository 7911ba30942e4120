use async_trait::async_trait;
use triage_core::models::{EpicDocument, Requirement, RuleSet};

use super::{SynthesisError, Synthesizer};

const LAST_UPDATED: &str = "_Last updated: ";
const RULES_HEADING: &str = "## Project rules";
/// Opens the generated rules section. Requirement text may repeat the
/// heading, so only this marker delimits the section.
const RULES_MARKER: &str = "<!-- triage:project-rules -->";

/// Offline synthesizer that builds the epic from the requirement fields.
///
/// Updates append a section per requirement to the prior document, so prior
/// content is always carried forward verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateSynthesizer;

fn requirement_section(requirement: &Requirement) -> String {
    let mut out = format!(
        "### {}\n\n{}\n",
        requirement.title.trim(),
        requirement.idea.trim()
    );

    if !requirement.envs.is_empty() {
        out.push_str("\n#### Environment variables\n\n");
        for (name, description) in &requirement.envs {
            out.push_str(&format!("- `{}`: {}\n", name, description));
        }
    }

    if !requirement.directives.is_empty() {
        out.push_str("\n#### Technical directives\n\n");
        for directive in &requirement.directives {
            out.push_str(&format!("- {}\n", directive));
        }
    }

    out
}

fn rules_section(rules: &RuleSet) -> Option<String> {
    rules
        .is_extension()
        .then(|| format!("{}\n{}\n\n{}\n", RULES_MARKER, RULES_HEADING, rules.text.trim()))
}

/// Drop a trailing rules section so it can be re-rendered from the effective rules.
fn strip_rules_section(content: &str) -> &str {
    let mut offset = 0;
    let mut cut = None;
    for line in content.split_inclusive('\n') {
        if line.trim_end() == RULES_MARKER {
            cut = Some(offset);
        }
        offset += line.len();
    }
    match cut {
        Some(at) => &content[..at],
        None => content,
    }
}

fn refresh_last_updated(content: &str, stamp: &str) -> String {
    let mut replaced = false;
    let lines: Vec<String> = content
        .lines()
        .map(|line| {
            if !replaced && line.starts_with(LAST_UPDATED) {
                replaced = true;
                format!("{}{}_", LAST_UPDATED, stamp)
            } else {
                line.to_string()
            }
        })
        .collect();
    lines.join("\n")
}

#[async_trait]
impl Synthesizer for TemplateSynthesizer {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn synthesize(
        &self,
        requirement: &Requirement,
        prior: Option<&EpicDocument>,
        rules: &RuleSet,
    ) -> Result<String, SynthesisError> {
        let stamp = requirement.received_at.format("%Y-%m-%d").to_string();

        let mut doc = match prior {
            Some(prior) => {
                let kept = strip_rules_section(&prior.content);
                let mut doc = refresh_last_updated(kept.trim_end(), &stamp);
                doc.push_str("\n\n");
                doc
            }
            None => format!(
                "# {}\n\n{}{}_\n\n## Requirements\n\n",
                requirement.project_title.trim(),
                LAST_UPDATED,
                stamp
            ),
        };

        doc.push_str(&requirement_section(requirement));
        if let Some(section) = rules_section(rules) {
            doc.push('\n');
            doc.push_str(&section);
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use triage_core::models::{ProjectSlug, RuleSource};

    use super::*;

    fn requirement(id: &str, title: &str, idea: &str, day: u32) -> Requirement {
        Requirement::new(id, "Project Phoenix", title, idea)
            .received_at(Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).unwrap())
    }

    fn prior(content: String) -> EpicDocument {
        EpicDocument::new(
            ProjectSlug::from_title("Project Phoenix").unwrap(),
            "Project Phoenix",
            content,
            None,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn fresh_document_is_seeded_from_requirement() {
        let doc = TemplateSynthesizer
            .synthesize(
                &requirement("m1", "Fitness", "tracks fitness goals", 1),
                None,
                &RuleSet::base(),
            )
            .await
            .unwrap();
        assert!(doc.starts_with("# Project Phoenix\n\n_Last updated: 2026-03-01_"));
        assert!(doc.contains("### Fitness\n\ntracks fitness goals"));
        assert!(!doc.contains(RULES_HEADING));
    }

    #[tokio::test]
    async fn update_keeps_prior_content_and_replaces_rules() {
        let old_rules = RuleSet {
            source: RuleSource::Stored,
            text: "Use layered architecture".to_string(),
        };
        let first = TemplateSynthesizer
            .synthesize(&requirement("m1", "Fitness", "tracks fitness goals", 1), None, &old_rules)
            .await
            .unwrap();

        let new_rules = RuleSet {
            source: RuleSource::Attached,
            text: "Use hexagonal architecture".to_string(),
        };
        let second = TemplateSynthesizer
            .synthesize(
                &requirement("m2", "Sharing", "shares workouts", 2),
                Some(&prior(first)),
                &new_rules,
            )
            .await
            .unwrap();

        assert!(second.contains("tracks fitness goals"));
        assert!(second.contains("shares workouts"));
        assert!(second.contains("_Last updated: 2026-03-02_"));
        assert!(!second.contains("2026-03-01"));
        assert!(second.contains("Use hexagonal architecture"));
        assert!(!second.contains("Use layered architecture"));
        assert_eq!(second.matches(RULES_HEADING).count(), 1);
    }

    #[test]
    fn strip_rules_section_only_cuts_at_marker() {
        assert_eq!(strip_rules_section("# A\n\nbody\n"), "# A\n\nbody\n");
        assert_eq!(
            strip_rules_section("# A\n\n## Project rules\n\nx\n"),
            "# A\n\n## Project rules\n\nx\n"
        );
        assert_eq!(
            strip_rules_section(
                "# A\n\n<!-- triage:project-rules -->\n## Project rules\n\nx\n"
            ),
            "# A\n\n"
        );
    }

    #[tokio::test]
    async fn heading_inside_requirement_text_survives_updates() {
        let rules = RuleSet {
            source: RuleSource::Stored,
            text: "Use layered architecture".to_string(),
        };
        let first = TemplateSynthesizer
            .synthesize(
                &requirement(
                    "m1",
                    "Docs",
                    "Render this heading:\n## Project rules\nand keep offline mode",
                    1,
                ),
                None,
                &rules,
            )
            .await
            .unwrap();

        let second = TemplateSynthesizer
            .synthesize(
                &requirement("m2", "Sharing", "shares workouts", 2),
                Some(&prior(first)),
                &rules,
            )
            .await
            .unwrap();

        assert!(second.contains("Render this heading:"));
        assert!(second.contains("and keep offline mode"));
        assert!(second.contains("shares workouts"));
        assert_eq!(second.matches(RULES_MARKER).count(), 1);
        assert_eq!(second.matches("Use layered architecture").count(), 1);
    }
}
