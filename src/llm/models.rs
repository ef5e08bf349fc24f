use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, Text2SqlError};

/// Provider families the client layer can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LlmType {
    #[serde(rename = "openai", alias = "OpenAI", alias = "OPENAI")]
    OpenAi,
    #[serde(rename = "anthropic", alias = "Anthropic", alias = "ANTHROPIC")]
    Anthropic,
    #[serde(rename = "google_ai", alias = "google", alias = "Google", alias = "GOOGLE_AI")]
    GoogleAi,
    #[serde(rename = "deepseek", alias = "DeepSeek", alias = "DEEPSEEK")]
    DeepSeek,
    #[serde(rename = "dashscope", alias = "DashScope", alias = "DASHSCOPE")]
    DashScope,
}

impl LlmType {
    pub const ALL: [LlmType; 5] = [
        LlmType::OpenAi,
        LlmType::Anthropic,
        LlmType::GoogleAi,
        LlmType::DeepSeek,
        LlmType::DashScope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmType::OpenAi => "openai",
            LlmType::Anthropic => "anthropic",
            LlmType::GoogleAi => "google_ai",
            LlmType::DeepSeek => "deepseek",
            LlmType::DashScope => "dashscope",
        }
    }

    pub fn allowed_models(&self) -> &'static [&'static str] {
        match self {
            LlmType::OpenAi => OPENAI_MODELS,
            LlmType::Anthropic => ANTHROPIC_MODELS,
            LlmType::GoogleAi => GOOGLE_AI_MODELS,
            LlmType::DeepSeek => DEEPSEEK_MODELS,
            LlmType::DashScope => DASHSCOPE_MODELS,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmType::OpenAi => "https://api.openai.com/v1",
            LlmType::Anthropic => "https://api.anthropic.com",
            LlmType::GoogleAi => "https://generativelanguage.googleapis.com",
            LlmType::DeepSeek => "https://api.deepseek.com",
            LlmType::DashScope => "https://dashscope-intl.aliyuncs.com/compatible-mode/v1",
        }
    }
}

impl fmt::Display for LlmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmType {
    type Err = Text2SqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmType::OpenAi),
            "anthropic" => Ok(LlmType::Anthropic),
            "google" | "google_ai" | "googleai" => Ok(LlmType::GoogleAi),
            "deepseek" => Ok(LlmType::DeepSeek),
            "dashscope" => Ok(LlmType::DashScope),
            other => Err(Text2SqlError::Config(format!("Unknown LLM type: {}", other))),
        }
    }
}

const OPENAI_MODELS: &[&str] = &[
    "gpt-3.5-turbo-0125",
    "gpt-4-0314",
    "gpt-4-32k-0314",
    "gpt-4-0613",
    "gpt-4-32k-0613",
    "gpt-4o-2024-08-06",
    "gpt-4o-mini-2024-07-18",
    "o1",
    "o3",
    "o4-mini",
    "o3-mini",
    "o1-mini",
];

const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-7-sonnet-20250219",
    "claude-3-sonnet-20240229",
    "claude-3-5-haiku-20241022",
    "claude-3-haiku-20240307",
    "claude-3-opus-20240229",
];

const GOOGLE_AI_MODELS: &[&str] = &[
    "gemini-1.5-flash",
    "gemini-1.5-pro",
    "gemini-1.5-flash-8b",
    "gemini-2.0-flash",
    "gemini-2.0-flash-thinking-exp-01-21",
    "gemini-2.0-flash-lite-preview-02-05",
    "gemini-2.0-pro-exp-02-05",
    "gemini-2.5-pro-exp-03-25",
    "gemini-2.5-pro-preview-03-25",
    "gemini-2.5-flash-preview-04-17",
];

const DEEPSEEK_MODELS: &[&str] = &["deepseek-chat", "deepseek-reasoner"];

const DASHSCOPE_MODELS: &[&str] = &[
    "qwen-max-latest",
    "qwen-plus-latest",
    "qwen-turbo-latest",
    "qwen2.5-14b-instruct-1m",
    "qwen2.5-7b-instruct-1m",
    "qwen2.5-72b-instruct",
    "qwen2.5-32b-instruct",
    "qwen2.5-14b-instruct",
    "qwen2.5-7b-instruct",
    "qwen1.5-110b-chat",
    "qwen1.5-72b-chat",
    "qwen1.5-32b-chat",
    "qwen1.5-14b-chat",
    "qwen1.5-7b-chat",
];

/// OpenAI reasoning models. They take `reasoning_effort` and no chat history.
pub const OPENAI_REASONING_MODELS: &[&str] = &["o1", "o1-mini", "o3", "o3-mini", "o4-mini"];

#[derive(Deserialize)]
struct RawLlmConfig {
    llm_type: LlmType,
    #[serde(alias = "model_type")]
    model: String,
    #[serde(default)]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    1024
}

/// Validated provider/model/sampling settings. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLlmConfig")]
pub struct LlmConfig {
    llm_type: LlmType,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl TryFrom<RawLlmConfig> for LlmConfig {
    type Error = Text2SqlError;

    fn try_from(raw: RawLlmConfig) -> Result<Self> {
        LlmConfig::new(raw.llm_type, raw.model, raw.temperature, raw.max_tokens)
    }
}

impl LlmConfig {
    pub fn new(
        llm_type: LlmType,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Self> {
        let model = model.into();
        if !llm_type.allowed_models().contains(&model.as_str()) {
            return Err(Text2SqlError::Config(format!(
                "Model '{}' is not supported for LLM type '{}'",
                model, llm_type
            )));
        }
        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            return Err(Text2SqlError::InvalidInput(format!(
                "temperature must be within [0, 2], got {}",
                temperature
            )));
        }
        if max_tokens == 0 {
            return Err(Text2SqlError::InvalidInput(
                "max_tokens must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            llm_type,
            model,
            temperature,
            max_tokens,
        })
    }

    pub fn llm_type(&self) -> LlmType {
        self.llm_type
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn is_reasoning_model(&self) -> bool {
        self.llm_type == LlmType::OpenAi && OPENAI_REASONING_MODELS.contains(&self.model.as_str())
    }

    /// Tag attached to every candidate this configuration produces.
    pub fn config_id(&self) -> String {
        format!("{}:{}:t{}", self.llm_type, self.model, self.temperature)
    }
}
