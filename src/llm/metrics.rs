//! Offline token counts and USD cost estimates for prompts and chats.
//!
//! Counts are approximations: text is split into word and punctuation runs,
//! and each run costs one token per four characters, rounded up. This tracks
//! BPE tokenizers closely enough for budgeting without shipping vocabularies.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::{Result, Text2SqlError};
use crate::llm::chat::ChatMessage;
use crate::llm::models::{LlmConfig, LlmType};

static PIECES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+|[^\w\s]+").unwrap());

const CHARS_PER_TOKEN: usize = 4;
/// OpenAI-wire chat framing per message, plus the primed assistant reply.
const TOKENS_PER_MESSAGE: usize = 3;
const REPLY_PRIMING: usize = 3;

/// USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

const fn price(input: f64, output: f64) -> Option<ModelPricing> {
    Some(ModelPricing { input, output })
}

pub fn pricing(llm_type: LlmType, model: &str) -> Option<ModelPricing> {
    match (llm_type, model) {
        (LlmType::OpenAi, "gpt-3.5-turbo-0125") => price(0.0005, 0.0015),
        (LlmType::OpenAi, "gpt-4-0314" | "gpt-4-0613") => price(0.03, 0.06),
        (LlmType::OpenAi, "gpt-4-32k-0314" | "gpt-4-32k-0613") => price(0.06, 0.12),
        (LlmType::OpenAi, "gpt-4o-2024-08-06") => price(0.0025, 0.01),
        (LlmType::OpenAi, "gpt-4o-mini-2024-07-18") => price(0.00015, 0.0006),
        (LlmType::OpenAi, "o1") => price(0.015, 0.06),
        (LlmType::OpenAi, "o1-mini" | "o3-mini") => price(0.0011, 0.0044),

        (LlmType::GoogleAi, "gemini-1.5-flash") => price(0.000075, 0.0003),
        (LlmType::GoogleAi, "gemini-1.5-pro") => price(0.00125, 0.005),
        (LlmType::GoogleAi, "gemini-1.5-flash-8b") => price(0.000035, 0.00015),
        (LlmType::GoogleAi, "gemini-2.0-flash") => price(0.0001, 0.0004),
        (LlmType::GoogleAi, "gemini-2.0-flash-lite-preview-02-05") => price(0.000075, 0.0003),
        (
            LlmType::GoogleAi,
            "gemini-2.0-flash-thinking-exp-01-21" | "gemini-2.0-pro-exp-02-05" | "gemini-2.5-pro-exp-03-25",
        ) => price(0.0, 0.0),
        // Prompts up to 200k tokens
        (LlmType::GoogleAi, "gemini-2.5-pro-preview-03-25") => price(0.00125, 0.01),
        (LlmType::GoogleAi, "gemini-2.5-flash-preview-04-17") => price(0.00015, 0.0006),

        (
            LlmType::Anthropic,
            "claude-3-5-sonnet-20241022" | "claude-3-7-sonnet-20250219" | "claude-3-sonnet-20240229",
        ) => price(0.003, 0.015),
        (LlmType::Anthropic, "claude-3-5-haiku-20241022") => price(0.0008, 0.004),
        (LlmType::Anthropic, "claude-3-haiku-20240307") => price(0.00025, 0.00125),
        (LlmType::Anthropic, "claude-3-opus-20240229") => price(0.015, 0.075),

        (LlmType::DashScope, "qwen-max-latest") => price(0.0016, 0.0064),
        (LlmType::DashScope, "qwen-plus-latest") => price(0.0004, 0.0012),
        (LlmType::DashScope, _) => price(0.0, 0.0),

        // Cache-miss rates
        (LlmType::DeepSeek, "deepseek-chat") => price(0.00027, 0.0011),
        (LlmType::DeepSeek, "deepseek-reasoner") => price(0.00055, 0.00219),

        _ => None,
    }
}

pub fn count_text_tokens(text: &str) -> usize {
    PIECES
        .find_iter(text)
        .map(|m| m.as_str().chars().count().div_ceil(CHARS_PER_TOKEN))
        .sum()
}

/// Tokens billed for sending `prompt` as a single user turn.
pub fn count_prompt_tokens(llm_type: LlmType, prompt: &str) -> usize {
    count_chat_tokens(llm_type, &[ChatMessage::user(prompt)])
}

pub fn count_chat_tokens(llm_type: LlmType, chat: &[ChatMessage]) -> usize {
    let content: usize = chat.iter().map(|m| count_text_tokens(&m.content)).sum();
    match llm_type {
        // Each role name encodes to a single token
        LlmType::OpenAi | LlmType::DeepSeek | LlmType::DashScope => {
            content + (1 + TOKENS_PER_MESSAGE) * chat.len() + REPLY_PRIMING
        }
        LlmType::Anthropic | LlmType::GoogleAi => content,
    }
}

/// Cost in USD for the given token counts.
pub fn estimate_cost(config: &LlmConfig, input_tokens: usize, output_tokens: usize) -> Result<f64> {
    let pricing = pricing(config.llm_type(), config.model()).ok_or_else(|| {
        Text2SqlError::Config(format!(
            "Pricing information not found for {} model {}",
            config.llm_type(),
            config.model()
        ))
    })?;
    Ok((pricing.input * input_tokens as f64 + pricing.output * output_tokens as f64) / 1000.0)
}

/// Token and cost estimate for one completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEstimate {
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Absent when the model has no known pricing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl UsageEstimate {
    pub fn for_prompt(config: &LlmConfig, prompt: &str, reply: &str) -> Self {
        let input_tokens = count_prompt_tokens(config.llm_type(), prompt);
        let output_tokens = count_text_tokens(reply);
        Self {
            input_tokens,
            output_tokens,
            cost_usd: estimate_cost(config, input_tokens, output_tokens).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_tokens() {
        assert_eq!(count_text_tokens(""), 0);
        // SELECT, *, FROM, hotel
        assert_eq!(count_text_tokens("SELECT * FROM hotel"), 6);
        assert_eq!(count_text_tokens("a, b"), 3);
    }

    #[test]
    fn test_chat_framing_depends_on_provider() {
        let chat = [ChatMessage::system("be brief"), ChatMessage::user("list hotels")];
        let content = count_text_tokens("be brief") + count_text_tokens("list hotels");
        assert_eq!(count_chat_tokens(LlmType::Anthropic, &chat), content);
        assert_eq!(count_chat_tokens(LlmType::OpenAi, &chat), content + 2 + 6 + 3);
        assert_eq!(
            count_prompt_tokens(LlmType::DeepSeek, "list hotels"),
            count_text_tokens("list hotels") + 1 + 3 + 3
        );
    }

    #[test]
    fn test_cost_per_thousand_tokens() {
        let config = LlmConfig::new(LlmType::OpenAi, "gpt-4o-2024-08-06", 0.0, 64).unwrap();
        let cost = estimate_cost(&config, 2000, 500).unwrap();
        assert!((cost - 0.01).abs() < 1e-12);

        let free = LlmConfig::new(LlmType::DashScope, "qwen2.5-7b-instruct", 0.0, 64).unwrap();
        assert_eq!(estimate_cost(&free, 10_000, 10_000).unwrap(), 0.0);
    }

    #[test]
    fn test_unpriced_model() {
        let config = LlmConfig::new(LlmType::OpenAi, "o4-mini", 0.0, 64).unwrap();
        let err = estimate_cost(&config, 1, 1).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");

        let usage = UsageEstimate::for_prompt(&config, "q", "SELECT 1");
        assert!(usage.cost_usd.is_none());
        assert_eq!(usage.output_tokens, 3);
    }
}
