//! Single-shot reply generation against an OpenAI-compatible
//! chat-completions endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use voxloop_core::ReplyGenerator;
use voxloop_foundation::CollaboratorError;

const COMPLETIONS_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Any OpenAI-compatible completions URL works here.
    pub endpoint: String,
}

impl ChatConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.6,
            endpoint: COMPLETIONS_ENDPOINT.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
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
    content: String,
}

pub struct OpenAiGenerator {
    config: ChatConfig,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiGenerator {
    async fn complete(&self, context: &str, input: &str) -> Result<String, CollaboratorError> {
        let request = ChatRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: context,
                },
                ChatMessage {
                    role: "user",
                    content: input,
                },
            ],
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(format!("completion request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Provider(format!(
                "completion returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Provider(format!("completion body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CollaboratorError::Provider("no completion choices returned".to_string()))
    }
}
