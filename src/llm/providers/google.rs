use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{check_status, ProviderCore};
use crate::error::{Result, Text2SqlError};
use crate::llm::chat::{validate_chat, validate_prompt, ChatMessage};
use crate::llm::formatter::{format_google, GoogleChat};
use crate::llm::models::LlmConfig;
use crate::llm::response::extract_sql;
use crate::llm::retry::{ProviderError, RetryHandler};
use crate::llm::LlmClient;

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
];

pub struct GoogleAiClient {
    core: ProviderCore,
}

#[derive(Serialize, Clone, Debug)]
struct Part {
    text: String,
}

#[derive(Serialize, Clone, Debug)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize, Clone, Debug)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Serialize, Clone, Debug)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Serialize, Clone, Debug)]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<SafetySetting>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GoogleAiClient {
    pub fn new(core: ProviderCore) -> Self {
        Self { core }
    }

    fn build_request(
        &self,
        system: Option<String>,
        history: Vec<Content>,
        message: String,
    ) -> GenerateContentRequest {
        let mut contents = history;
        contents.push(Content {
            role: "user".to_string(),
            parts: vec![Part { text: message }],
        });

        GenerateContentRequest {
            system_instruction: system.map(|text| SystemInstruction {
                parts: vec![Part { text }],
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: self.core.config.temperature(),
                max_output_tokens: self.core.config.max_tokens(),
            },
            safety_settings: HARM_CATEGORIES
                .into_iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
        }
    }

    fn request_from_chat(&self, chat: GoogleChat) -> Result<GenerateContentRequest> {
        let message = chat.message.ok_or_else(|| {
            Text2SqlError::InvalidChat("the last chat message must be a user turn".to_string())
        })?;
        let history = chat
            .history
            .into_iter()
            .map(|item| Content {
                role: item.role,
                parts: item.parts.into_iter().map(|text| Part { text }).collect(),
            })
            .collect();
        Ok(self.build_request(chat.system_instruction, history, message))
    }

    async fn dispatch(&mut self, request: GenerateContentRequest) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.core.base_url,
            self.core.config.model()
        );
        let http = self.core.http.clone();

        debug!("Dispatching {} contents to google_ai", request.contents.len());

        let content = self
            .core
            .retry
            .execute(|key| send(http.clone(), url.clone(), key, request.clone()))
            .await?;
        Ok(extract_sql(&content))
    }
}

async fn send(
    http: reqwest::Client,
    url: String,
    key: String,
    request: GenerateContentRequest,
) -> std::result::Result<String, ProviderError> {
    let response = http
        .post(&url)
        .query(&[("key", key.as_str())])
        .json(&request)
        .send()
        .await?;
    let response = check_status(response).await?;
    let parsed: GenerateContentResponse = response.json().await?;

    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        Err(ProviderError("No candidates in response".to_string()))
    } else {
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for GoogleAiClient {
    fn config(&self) -> &LlmConfig {
        &self.core.config
    }

    fn retry_handler(&self) -> &RetryHandler {
        &self.core.retry
    }

    async fn execute_prompt(&mut self, prompt: &str) -> Result<String> {
        validate_prompt(prompt)?;
        info!("Sending prompt to {}", self.core.config.config_id());
        let request = self.build_request(None, Vec::new(), prompt.to_string());
        self.dispatch(request).await
    }

    async fn execute_chat(&mut self, chat: &[ChatMessage]) -> Result<String> {
        validate_chat(chat)?;
        let request = self.request_from_chat(format_google(chat))?;
        self.dispatch(request).await
    }
}
