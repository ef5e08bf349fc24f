use async_trait::async_trait;
use std::collections::VecDeque;

use super::chat::{validate_chat, validate_prompt, ChatMessage};
use super::key_ring::ApiKeyRing;
use super::models::{LlmConfig, LlmType};
use super::retry::RetryHandler;
use super::LlmClient;
use crate::error::{Result, Text2SqlError};

/// Replays canned replies in order and records every prompt it was sent.
pub(crate) struct ScriptedClient {
    config: LlmConfig,
    retry: RetryHandler,
    replies: VecDeque<String>,
    pub prompts: Vec<String>,
    pub chats: Vec<Vec<ChatMessage>>,
}

impl ScriptedClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = LlmConfig::new(LlmType::OpenAi, "gpt-4o-mini-2024-07-18", 0.0, 256).unwrap();
        let retry = RetryHandler::new(
            LlmType::OpenAi,
            ApiKeyRing::with_start_index(vec!["test".into()], 0).unwrap(),
        );
        Self {
            config,
            retry,
            replies: replies.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
            chats: Vec::new(),
        }
    }

    fn next_reply(&mut self) -> Result<String> {
        self.replies.pop_front().ok_or_else(|| Text2SqlError::ApiFailure {
            provider: "openai".to_string(),
            detail: "script exhausted".to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn retry_handler(&self) -> &RetryHandler {
        &self.retry
    }

    async fn execute_prompt(&mut self, prompt: &str) -> Result<String> {
        validate_prompt(prompt)?;
        self.prompts.push(prompt.to_string());
        self.next_reply()
    }

    async fn execute_chat(&mut self, chat: &[ChatMessage]) -> Result<String> {
        validate_chat(chat)?;
        let last = chat.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.push(last);
        self.chats.push(chat.to_vec());
        self.next_reply()
    }
}
