pub mod chat;
pub mod formatter;
pub mod key_ring;
pub mod metrics;
#[cfg(test)]
pub(crate) mod mock;
pub mod models;
pub mod providers;
pub mod response;
pub mod retry;

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::config::{ApiKeys, LlmSettings};
use crate::error::{Result, Text2SqlError};
use chat::ChatMessage;
use key_ring::ApiKeyRing;
use models::{LlmConfig, LlmType};
use providers::anthropic::AnthropicClient;
use providers::google::GoogleAiClient;
use providers::openai::OpenAiWireClient;
use providers::ProviderCore;
use retry::RetryHandler;

/// Provider-agnostic completion contract.
///
/// Implementations are single-owner: calls take `&mut self` because a dispatch
/// may rotate the client's key ring.
#[async_trait]
pub trait LlmClient: Send {
    fn config(&self) -> &LlmConfig;

    fn retry_handler(&self) -> &RetryHandler;

    /// Sends `prompt` as a single user message.
    async fn execute_prompt(&mut self, prompt: &str) -> Result<String>;

    /// Sends an ordered chat and returns the model's reply.
    async fn execute_chat(&mut self, chat: &[ChatMessage]) -> Result<String>;
}

pub struct ClientFactory;

impl ClientFactory {
    pub fn create(
        config: &LlmConfig,
        keys: &ApiKeys,
        settings: &LlmSettings,
    ) -> Result<Box<dyn LlmClient>> {
        let llm_type = config.llm_type();
        let key_ring = ApiKeyRing::new(keys.for_provider(llm_type)?)?;

        let mut retry = RetryHandler::new(llm_type, key_ring)
            .with_backoff(Duration::from_secs(settings.backoff_seconds));
        if let Some(max) = settings.max_backoff_cycles {
            retry = retry.with_max_backoffs(max);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .map_err(|e| Text2SqlError::Config(format!("failed to build HTTP client: {}", e)))?;

        let base_url = settings
            .base_url_override(llm_type)
            .unwrap_or(llm_type.default_base_url());

        info!("Creating {} client for {}", llm_type, config.config_id());
        let core = ProviderCore::new(config.clone(), http, base_url, retry);

        let client: Box<dyn LlmClient> = match llm_type {
            LlmType::OpenAi => Box::new(OpenAiWireClient::new(core, false)),
            LlmType::DeepSeek | LlmType::DashScope => Box::new(OpenAiWireClient::new(core, true)),
            LlmType::Anthropic => Box::new(AnthropicClient::new(core)),
            LlmType::GoogleAi => Box::new(GoogleAiClient::new(core)),
        };
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_fail_fast() {
        let config = LlmConfig::new(LlmType::DashScope, "qwen-max-latest", 0.0, 10).unwrap();
        let result = ClientFactory::create(&config, &ApiKeys::default(), &LlmSettings::default());
        let err = result.err().unwrap();
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.to_string().contains("DASHSCOPE_API_KEYS"));
    }

    #[test]
    fn test_factory_wires_config() {
        let config = LlmConfig::new(LlmType::Anthropic, "claude-3-opus-20240229", 1.0, 10).unwrap();
        let keys = ApiKeys::default().with_keys(LlmType::Anthropic, vec!["a".into(), "b".into()]);
        let client = ClientFactory::create(&config, &keys, &LlmSettings::default()).unwrap();
        assert_eq!(client.config(), &config);
        assert_eq!(client.retry_handler().key_ring().size(), 2);
    }
}
