use std::collections::BTreeMap;

use regex::Regex;
use triage_core::models::Requirement;

use super::InboundMessage;

/// Attachment whose content becomes the requirement's extension rules.
pub const RULES_ATTACHMENT: &str = "project-extension-rules.md";

/// Extracts requirements from `<prefix>[<Project Title>]` messages.
#[derive(Debug, Clone)]
pub struct RequirementParser {
    subject: Regex,
    tag: Regex,
    env_line: Regex,
}

impl RequirementParser {
    pub fn new(subject_prefix: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            subject: Regex::new(&format!(
                r"(?i)^\s*{}\[([^\]]+)\]",
                regex::escape(subject_prefix)
            ))?,
            tag: Regex::new(r"(?i)\[(title|idea|envs|directives)\]")?,
            env_line: Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(?::|=|\s-\s)\s*(.*)$")?,
        })
    }

    /// `None` when the subject does not carry the prefix.
    ///
    /// Missing `[title]` or `[idea]` sections yield empty fields, which the
    /// engine rejects as an invalid requirement.
    pub fn parse(&self, message: &InboundMessage) -> Option<Requirement> {
        let project_title = self
            .subject
            .captures(&message.subject)?
            .get(1)?
            .as_str()
            .trim()
            .to_string();

        let tags = self.body_tags(&message.body);
        let section = |name: &str| tags.get(name).cloned().unwrap_or_default();

        let mut requirement = Requirement::new(
            message.message_id.clone(),
            project_title,
            section("title"),
            section("idea"),
        )
        .with_envs(self.envs(&section("envs")))
        .with_directives(directives(&section("directives")))
        .with_subject(message.subject.clone())
        .received_at(message.received_at);

        if let Some(sender) = &message.sender {
            requirement = requirement.with_sender(sender.clone());
        }

        if let Some(rules) = message
            .attachments
            .iter()
            .find(|a| a.filename.eq_ignore_ascii_case(RULES_ATTACHMENT))
        {
            requirement = requirement.with_attached_rules(rules.content.clone());
        }

        Some(requirement)
    }

    /// Each tag's content runs to the next tag or the end of the body.
    fn body_tags(&self, body: &str) -> BTreeMap<String, String> {
        let marks: Vec<(String, usize, usize)> = self
            .tag
            .captures_iter(body)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((caps[1].to_lowercase(), whole.start(), whole.end()))
            })
            .collect();

        let mut tags = BTreeMap::new();
        for (i, (name, _, content_start)) in marks.iter().enumerate() {
            let content_end = marks.get(i + 1).map(|m| m.1).unwrap_or(body.len());
            let content = body[*content_start..content_end].trim();
            if !content.is_empty() {
                tags.insert(name.clone(), content.to_string());
            }
        }
        tags
    }

    fn envs(&self, section: &str) -> BTreeMap<String, String> {
        let mut envs = BTreeMap::new();
        for line in section.lines().map(strip_bullet).filter(|l| !l.is_empty()) {
            match self.env_line.captures(line) {
                Some(caps) => {
                    envs.insert(caps[1].to_string(), caps[2].trim().to_string());
                }
                None if !line.contains(char::is_whitespace) => {
                    envs.insert(line.to_string(), String::new());
                }
                None => tracing::debug!(line, "Ignoring unparseable env line"),
            }
        }
        envs
    }
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim();
    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.trim();
        }
    }
    // Numbered lists: "1. " / "12) "
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim();
        }
    }
    line
}

fn directives(section: &str) -> Vec<String> {
    section
        .lines()
        .map(strip_bullet)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// One-shot form of [`RequirementParser::parse`].
pub fn parse_requirement(message: &InboundMessage, subject_prefix: &str) -> Option<Requirement> {
    RequirementParser::new(subject_prefix)
        .ok()?
        .parse(message)
}
