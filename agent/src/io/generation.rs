//! Code generation client: turns prompts into candidate parser source.
//!
//! The [`CompletionClient`] trait decouples the orchestrator from the LLM backend
//! (currently any OpenAI-compatible chat-completions API). Tests use scripted
//! clients that return predetermined completions without touching the network.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::extract::extract_source;
use crate::io::config::LlmConfig;

/// Cap on how much of an error body is kept in diagnostics.
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Rate or quota exhaustion reported by the service. Terminal for the run.
    #[error("generation quota exhausted: {message}")]
    Quota { message: String },
    /// Any other transport or service failure. Retried once in place.
    #[error("generation service error: {message}")]
    Service { message: String },
    /// The completion contained no usable source text.
    #[error("generation returned no usable source text")]
    EmptyResponse,
}

/// Abstraction over text-completion backends.
pub trait CompletionClient {
    /// Send `prompt` and return the raw completion text.
    fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Request a completion and keep only the candidate module's source.
#[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
pub fn generate_source<C: CompletionClient>(
    client: &C,
    prompt: &str,
) -> Result<String, GenerationError> {
    let response = client.complete(prompt)?;
    let source = extract_source(&response).ok_or(GenerationError::EmptyResponse)?;
    debug!(
        response_bytes = response.len(),
        source_bytes = source.len(),
        "extracted candidate source"
    );
    Ok(source)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Blocking client for `POST {base_url}/chat/completions`.
pub struct ChatCompletionClient {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl ChatCompletionClient {
    pub fn new(config: &LlmConfig, api_key: String) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.request_timeout_secs)))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

impl CompletionClient for ChatCompletionClient {
    #[instrument(skip_all, fields(model = %self.model))]
    fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let authorization = format!("Bearer {}", self.api_key);

        let mut response = self
            .agent
            .post(self.endpoint.as_str())
            .header("Authorization", authorization.as_str())
            .header("Content-Type", "application/json")
            .send_json(&body)
            .map_err(|err| GenerationError::Service {
                message: format!("request to {} failed: {err}", self.endpoint),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response
                .body_mut()
                .read_to_string()
                .unwrap_or_default();
            let err = classify_http_failure(status, &body);
            warn!(status, err = %err, "completion request rejected");
            return Err(err);
        }

        let parsed: ChatResponse =
            response
                .body_mut()
                .read_json()
                .map_err(|err| GenerationError::Service {
                    message: format!("unreadable completion response: {err}"),
                })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        debug!(status, content_bytes = content.len(), "completion received");
        Ok(content)
    }
}

/// Map a non-success HTTP response onto the generation error taxonomy.
///
/// 429 and any body that mentions quota or rate limits are quota exhaustion;
/// everything else is a service error.
pub fn classify_http_failure(status: u16, body: &str) -> GenerationError {
    let lower = body.to_lowercase();
    let message = format!("HTTP {status}: {}", truncate(body.trim(), ERROR_BODY_LIMIT));
    if status == 429
        || lower.contains("quota")
        || lower.contains("rate_limit")
        || lower.contains("rate limit")
    {
        GenerationError::Quota { message }
    } else {
        GenerationError::Service { message }
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClient(Result<String, GenerationError>);

    impl CompletionClient for FixedClient {
        fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.0.clone()
        }
    }

    #[test]
    fn generate_source_strips_fences() {
        let client = FixedClient(Ok(
            "Here you go:\n```python\ndef parse(p):\n    pass\n```".to_string()
        ));
        assert_eq!(
            generate_source(&client, "prompt").expect("source"),
            "def parse(p):\n    pass\n"
        );
    }

    #[test]
    fn blank_completion_is_empty_response() {
        let client = FixedClient(Ok("```python\n```".to_string()));
        assert_eq!(
            generate_source(&client, "prompt"),
            Err(GenerationError::EmptyResponse)
        );
    }

    #[test]
    fn client_errors_pass_through() {
        let client = FixedClient(Err(GenerationError::Quota {
            message: "HTTP 429".to_string(),
        }));
        assert!(matches!(
            generate_source(&client, "prompt"),
            Err(GenerationError::Quota { .. })
        ));
    }

    #[test]
    fn rate_limits_and_quota_bodies_are_quota_errors() {
        assert!(matches!(
            classify_http_failure(429, "slow down"),
            GenerationError::Quota { .. }
        ));
        assert!(matches!(
            classify_http_failure(
                403,
                r#"{"error":{"code":"insufficient_quota","message":"You exceeded your current quota"}}"#
            ),
            GenerationError::Quota { .. }
        ));
    }

    #[test]
    fn other_failures_are_service_errors() {
        match classify_http_failure(503, "upstream unavailable") {
            GenerationError::Service { message } => {
                assert_eq!(message, "HTTP 503: upstream unavailable");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "é".repeat(400);
        match classify_http_failure(500, &body) {
            GenerationError::Service { message } => assert!(message.len() < 520),
            other => panic!("unexpected {other:?}"),
        }
    }
}
