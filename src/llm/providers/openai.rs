use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{check_status, ProviderCore};
use crate::error::{Result, Text2SqlError};
use crate::llm::chat::{validate_chat, validate_prompt, ChatMessage};
use crate::llm::formatter::{format_openai, RoleContent};
use crate::llm::models::LlmConfig;
use crate::llm::response::extract_sql;
use crate::llm::retry::{ProviderError, RetryHandler};
use crate::llm::LlmClient;

/// Client for any endpoint speaking the OpenAI chat-completions wire format.
/// Serves OpenAI itself as well as DeepSeek and DashScope.
pub struct OpenAiWireClient {
    core: ProviderCore,
    extract_fences: bool,
}

#[derive(Serialize, Clone, Debug)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<RoleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiWireClient {
    pub fn new(core: ProviderCore, extract_fences: bool) -> Self {
        Self {
            core,
            extract_fences,
        }
    }

    fn build_request(&self, messages: Vec<RoleContent>) -> ChatCompletionRequest {
        let config = &self.core.config;
        if config.is_reasoning_model() {
            ChatCompletionRequest {
                model: config.model().to_string(),
                messages,
                temperature: None,
                max_tokens: None,
                reasoning_effort: Some("high".to_string()),
            }
        } else {
            ChatCompletionRequest {
                model: config.model().to_string(),
                messages,
                temperature: Some(config.temperature()),
                max_tokens: Some(config.max_tokens()),
                reasoning_effort: None,
            }
        }
    }

    async fn dispatch(&mut self, messages: Vec<RoleContent>) -> Result<String> {
        let request = self.build_request(messages);
        let url = format!("{}/chat/completions", self.core.base_url);
        let http = self.core.http.clone();

        debug!(
            "Dispatching {} messages to {} ({})",
            request.messages.len(),
            self.core.config.llm_type(),
            self.core.config.model()
        );

        let content = self
            .core
            .retry
            .execute(|key| send(http.clone(), url.clone(), key, request.clone()))
            .await?;

        if self.extract_fences {
            Ok(extract_sql(&content))
        } else {
            Ok(content)
        }
    }
}

async fn send(
    http: reqwest::Client,
    url: String,
    key: String,
    request: ChatCompletionRequest,
) -> std::result::Result<String, ProviderError> {
    let response = http
        .post(&url)
        .bearer_auth(key)
        .json(&request)
        .send()
        .await?;
    let response = check_status(response).await?;
    let parsed: ChatCompletionResponse = response.json().await?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProviderError("No choices in response".to_string()))
}

#[async_trait]
impl LlmClient for OpenAiWireClient {
    fn config(&self) -> &LlmConfig {
        &self.core.config
    }

    fn retry_handler(&self) -> &RetryHandler {
        &self.core.retry
    }

    async fn execute_prompt(&mut self, prompt: &str) -> Result<String> {
        validate_prompt(prompt)?;
        info!("Sending prompt to {}", self.core.config.config_id());
        self.dispatch(vec![RoleContent {
            role: "user".to_string(),
            content: prompt.to_string(),
        }])
        .await
    }

    async fn execute_chat(&mut self, chat: &[ChatMessage]) -> Result<String> {
        validate_chat(chat)?;
        if self.core.config.is_reasoning_model() {
            return Err(Text2SqlError::InvalidInput(
                "This model does not support chat completion.".to_string(),
            ));
        }
        self.dispatch(format_openai(chat)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::key_ring::ApiKeyRing;
    use crate::llm::models::LlmType;

    fn client(model: &str) -> OpenAiWireClient {
        let config = LlmConfig::new(LlmType::OpenAi, model, 0.2, 256).unwrap();
        let retry = RetryHandler::new(
            LlmType::OpenAi,
            ApiKeyRing::with_start_index(vec!["k".into()], 0).unwrap(),
        );
        OpenAiWireClient::new(
            ProviderCore::new(config, reqwest::Client::new(), "http://127.0.0.1:9/", retry),
            false,
        )
    }

    #[test]
    fn test_reasoning_models_send_effort() {
        let body = serde_json::to_value(client("o3-mini").build_request(vec![])).unwrap();
        assert_eq!(body["reasoning_effort"], "high");
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());

        let body = serde_json::to_value(client("gpt-4o-2024-08-06").build_request(vec![])).unwrap();
        assert_eq!(body["max_tokens"], 256);
        assert!(body.get("reasoning_effort").is_none());
    }

    #[tokio::test]
    async fn test_input_validation_happens_before_dispatch() {
        let mut c = client("gpt-4o-2024-08-06");
        assert!(matches!(c.execute_prompt("").await, Err(Text2SqlError::EmptyPrompt)));
        assert!(matches!(c.execute_chat(&[]).await, Err(Text2SqlError::EmptyChatHistory)));
    }

    #[tokio::test]
    async fn test_reasoning_models_reject_chat() {
        let mut c = client("o1");
        let err = c.execute_chat(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
        assert_eq!(c.retry_handler().key_ring().rotations(), 0);
    }
}
