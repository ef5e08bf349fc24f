use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{check_status, ProviderCore};
use crate::error::Result;
use crate::llm::chat::{validate_chat, validate_prompt, ChatMessage};
use crate::llm::formatter::{format_anthropic, AnthropicChat, RoleContent};
use crate::llm::models::LlmConfig;
use crate::llm::retry::{ProviderError, RetryHandler};
use crate::llm::LlmClient;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    core: ProviderCore,
}

#[derive(Serialize, Clone, Debug)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<RoleContent>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn new(core: ProviderCore) -> Self {
        Self { core }
    }

    fn build_request(&self, chat: AnthropicChat) -> MessagesRequest {
        MessagesRequest {
            model: self.core.config.model().to_string(),
            max_tokens: self.core.config.max_tokens(),
            temperature: self.core.config.temperature(),
            system: chat.system,
            messages: chat.messages,
        }
    }

    async fn dispatch(&mut self, chat: AnthropicChat) -> Result<String> {
        let request = self.build_request(chat);
        let url = format!("{}/v1/messages", self.core.base_url);
        let http = self.core.http.clone();

        debug!("Dispatching {} messages to anthropic", request.messages.len());

        self.core
            .retry
            .execute(|key| send(http.clone(), url.clone(), key, request.clone()))
            .await
    }
}

async fn send(
    http: reqwest::Client,
    url: String,
    key: String,
    request: MessagesRequest,
) -> std::result::Result<String, ProviderError> {
    let response = http
        .post(&url)
        .header("x-api-key", key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&request)
        .send()
        .await?;
    let response = check_status(response).await?;
    let parsed: MessagesResponse = response.json().await?;

    let text: Vec<String> = parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();

    if text.is_empty() {
        Err(ProviderError("Missing text content in response".to_string()))
    } else {
        Ok(text.join(""))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn config(&self) -> &LlmConfig {
        &self.core.config
    }

    fn retry_handler(&self) -> &RetryHandler {
        &self.core.retry
    }

    async fn execute_prompt(&mut self, prompt: &str) -> Result<String> {
        validate_prompt(prompt)?;
        info!("Sending prompt to {}", self.core.config.config_id());
        self.dispatch(format_anthropic(&[ChatMessage::user(prompt)]))
            .await
    }

    async fn execute_chat(&mut self, chat: &[ChatMessage]) -> Result<String> {
        validate_chat(chat)?;
        self.dispatch(format_anthropic(chat)).await
    }
}
