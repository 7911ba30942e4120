//! Epic synthesis collaborator.
//!
//! A [`Synthesizer`] turns a requirement, the prior epic (if any) and the
//! effective rules into a complete replacement document. Preserving prior
//! content is the synthesizer's contract; the engine only checks that the
//! result is a well-formed Markdown document via [`normalize_document`].

mod chat;
pub mod prompt;
mod template;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use triage_core::models::{EpicDocument, Requirement, RuleSet};
use triage_core::TriageError;

pub use chat::ChatCompletionsSynthesizer;
pub use template::TemplateSynthesizer;

use crate::config::Settings;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// Transport, quota or server-side failure. The next run retries.
    #[error("synthesis unavailable: {0}")]
    Unavailable(String),

    /// The service refused the input. Retrying will not help.
    #[error("synthesis rejected: {0}")]
    Rejected(String),
}

impl From<SynthesisError> for TriageError {
    fn from(err: SynthesisError) -> Self {
        match err {
            SynthesisError::Unavailable(detail) => TriageError::SynthesisUnavailable(detail),
            SynthesisError::Rejected(detail) => TriageError::SynthesisRejected(detail),
        }
    }
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    async fn synthesize(
        &self,
        requirement: &Requirement,
        prior: Option<&EpicDocument>,
        rules: &RuleSet,
    ) -> Result<String, SynthesisError>;
}

/// The HTTP backend when a URL and key are configured, otherwise the offline template.
pub fn from_settings(settings: &Settings) -> Result<Arc<dyn Synthesizer>, reqwest::Error> {
    match (&settings.synthesis_url, &settings.synthesis_api_key) {
        (Some(url), Some(key)) => Ok(Arc::new(ChatCompletionsSynthesizer::new(
            url.clone(),
            key.clone(),
            settings.synthesis_model.clone(),
            settings.call_timeout,
        )?)),
        _ => {
            tracing::info!("No synthesis endpoint configured, using template synthesizer");
            Ok(Arc::new(TemplateSynthesizer))
        }
    }
}

/// Strip a surrounding code fence and check the text is a Markdown document.
pub fn normalize_document(raw: &str) -> Result<String, SynthesisError> {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string (```markdown) along with the opening fence
        let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = body.trim_end().strip_suffix("```").unwrap_or(body).trim();
    }

    if text.is_empty() {
        return Err(SynthesisError::Unavailable("empty document".to_string()));
    }
    if !text.lines().any(|line| line.trim_start().starts_with('#')) {
        return Err(SynthesisError::Unavailable(
            "document has no Markdown heading".to_string(),
        ));
    }

    let mut document = text.to_string();
    document.push('\n');
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fence() {
        let raw = "```markdown\n# Epic\n\nBody\n```\n";
        assert_eq!(normalize_document(raw).unwrap(), "# Epic\n\nBody\n");
    }

    #[test]
    fn keeps_plain_documents() {
        assert_eq!(normalize_document("  # Epic\nBody  ").unwrap(), "# Epic\nBody\n");
    }

    #[test]
    fn rejects_empty_and_headingless_output() {
        assert!(matches!(normalize_document("  \n"), Err(SynthesisError::Unavailable(_))));
        assert!(matches!(normalize_document("```\n```"), Err(SynthesisError::Unavailable(_))));
        assert!(matches!(
            normalize_document("Sorry, I cannot help with that."),
            Err(SynthesisError::Unavailable(_))
        ));
    }

    #[test]
    fn maps_onto_triage_taxonomy() {
        let err: TriageError = SynthesisError::Rejected("400".into()).into();
        assert!(!err.is_retryable());
        let err: TriageError = SynthesisError::Unavailable("503".into()).into();
        assert!(err.is_retryable());
    }
}
