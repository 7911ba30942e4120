use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use triage_core::models::{EpicDocument, Requirement, RuleSet};

use super::{prompt, SynthesisError, Synthesizer};

/// OpenAI-compatible `/chat/completions` backend.
///
/// `url` is the full endpoint URL. The key is sent both as `api-key` (Azure
/// style) and as a bearer token.
#[derive(Debug, Clone)]
pub struct ChatCompletionsSynthesizer {
    url: String,
    api_key: String,
    model: String,
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsSynthesizer {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

fn classify_status(status: StatusCode, body: &str) -> SynthesisError {
    let snippet: String = body.chars().take(200).collect();
    let detail = format!("{}: {}", status, snippet);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        SynthesisError::Unavailable(detail)
    } else {
        SynthesisError::Rejected(detail)
    }
}

#[async_trait]
impl Synthesizer for ChatCompletionsSynthesizer {
    fn name(&self) -> &'static str {
        "chat_completions"
    }

    async fn synthesize(
        &self,
        requirement: &Requirement,
        prior: Option<&EpicDocument>,
        rules: &RuleSet,
    ) -> Result<String, SynthesisError> {
        let system = prompt::system_message(rules);
        let user = match prior {
            Some(prior) => prompt::update_prompt(requirement, prior),
            None => prompt::creation_prompt(requirement),
        };

        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
        };

        tracing::debug!(url = %self.url, model = %self.model, "Sending chat completion request");
        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SynthesisError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::Unavailable(format!("unreadable response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SynthesisError::Unavailable("response had no choices".to_string()))?;

        tracing::info!(
            model = parsed.model.as_deref().unwrap_or(&self.model),
            length = content.len(),
            "Chat completion received"
        );
        Ok(content)
    }
}
