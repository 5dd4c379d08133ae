//! LLM-backed content generator.
//!
//! Thin chat-completions client. Structured output goes through the
//! response-format JSON schema channel so the answer parses without
//! prompt acrobatics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::AutomationError;

use super::http::{status_error, transport_error};
use super::traits::BaseContentGenerator;

pub struct OpenAiGenerator {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
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
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OpenAiGenerator {
    pub fn new(api_url: String, api_key: String, model: String) -> Result<Self, AutomationError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| AutomationError::terminal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_url,
            api_key,
            model,
            client,
        })
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<String, AutomationError> {
        debug!(model = %request.model, "calling chat completions");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error("LLM API", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("LLM API", status, &body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| transport_error("LLM API", e))?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AutomationError::transient("LLM returned no choices"))
    }
}

#[async_trait]
impl BaseContentGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, AutomationError> {
        self.chat(&ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            response_format: None,
        })
        .await
    }

    async fn generate_structured(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: serde_json::Value,
    ) -> Result<String, AutomationError> {
        self.chat(&ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            response_format: Some(serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": "structured_output", "schema": schema }
            })),
        })
        .await
    }
}
