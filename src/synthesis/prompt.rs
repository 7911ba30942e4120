//! Prompt construction for chat-style synthesis backends.

use triage_core::models::{EpicDocument, Requirement, RuleSet, BASE_RULES, EMAIL_FORMAT_RULES};

/// Base rules, the email format, and project extension rules when they apply.
pub fn system_message(rules: &RuleSet) -> String {
    let mut parts = vec![BASE_RULES.trim().to_string()];

    parts.push(format!(
        "## Email Format Rules\n\n\
         The following rules define the structured email format used to send the \
         requirements. Use them to interpret each section of the email:\n\n{}",
        EMAIL_FORMAT_RULES.trim()
    ));

    if rules.is_extension() {
        parts.push(format!(
            "## Project-Specific Extension Rules\n\n\
             The following project-specific rules take precedence over the general \
             rules above:\n\n{}",
            rules.text.trim()
        ));
    }

    parts.join("\n\n")
}

/// The requirement as labelled sections; `update` changes the idea heading.
fn requirement_sections(requirement: &Requirement, update: bool) -> String {
    let mut sections = vec![format!("### Title\n\n{}", requirement.title.trim())];

    let idea_heading = if update { "Idea / Concept Update" } else { "Idea / Concept" };
    sections.push(format!("### {}\n\n{}", idea_heading, requirement.idea.trim()));

    if !requirement.envs.is_empty() {
        let envs = requirement
            .envs
            .iter()
            .map(|(name, description)| format!("- `{}`: {}", name, description))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!(
            "### Environment Variables\n\n\
             Translate these into a `.env`-equivalent section of the epic:\n\n{}",
            envs
        ));
    }

    if !requirement.directives.is_empty() {
        let directives = requirement
            .directives
            .iter()
            .map(|d| format!("- {}", d))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!(
            "### Technical Directives\n\n\
             These instructions must be reflected in the epic's technical sections \
             (dependencies, frameworks, architectural patterns, coding standards, tools):\n\n{}",
            directives
        ));
    }

    sections.join("\n\n")
}

pub fn creation_prompt(requirement: &Requirement) -> String {
    format!(
        "# Requirements email for project: {project}\n\n\
         {sections}\n\n\
         ---\n\n\
         Produce a comprehensive, well-structured Markdown epic document for the \
         development team. The epic must include at minimum:\n\
         - Project title and executive summary\n\
         - Goals and success criteria\n\
         - Key features / functional requirements\n\
         - Non-functional requirements (performance, security, scalability)\n\
         - Environment variables section (if [envs] was provided)\n\
         - Technical stack and directives section (if [directives] was provided)\n\
         - Out-of-scope items\n\
         - Open questions / assumptions\n\n\
         Use Markdown headings (##, ###), bullet lists and tables where they help. \
         Return only the Markdown document.",
        project = requirement.project_title.trim(),
        sections = requirement_sections(requirement, false),
    )
}

pub fn update_prompt(requirement: &Requirement, prior: &EpicDocument) -> String {
    format!(
        "# Update request for project: {project}\n\n\
         ## Existing epic\n\n\
         {existing}\n\n\
         ---\n\n\
         ## New requirements received via email\n\n\
         {sections}\n\n\
         ---\n\n\
         Merge the new requirements into the existing epic.\n\
         - Preserve all existing content that is not superseded.\n\
         - Add new sections or extend existing ones as needed.\n\
         - Update the \"Last Updated\" date at the top.\n\
         - If requirements conflict with existing content, prefer the new ones and \
         add a note explaining what changed.\n\
         - Return the complete updated epic as a Markdown document.",
        project = requirement.project_title.trim(),
        existing = prior.content.trim(),
        sections = requirement_sections(requirement, true),
    )
}
