//! Translation of an abstract chat into each provider's native message shape.

use serde::Serialize;

use super::chat::{ChatMessage, ChatRole};

/// `{role, content}` pair used by the OpenAI wire and by Anthropic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleContent {
    pub role: String,
    pub content: String,
}

fn openai_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Model => "assistant",
    }
}

/// Flat message list. Empty messages are dropped.
pub fn format_openai(chat: &[ChatMessage]) -> Vec<RoleContent> {
    chat.iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| RoleContent {
            role: openai_role(m.role).to_string(),
            content: m.content.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnthropicChat {
    pub system: Option<String>,
    pub messages: Vec<RoleContent>,
}

pub fn format_anthropic(chat: &[ChatMessage]) -> AnthropicChat {
    let system = chat
        .iter()
        .find(|m| m.role == ChatRole::System && !m.content.is_empty())
        .map(|m| m.content.clone());

    let messages = chat
        .iter()
        .filter(|m| m.role != ChatRole::System && !m.content.is_empty())
        .map(|m| RoleContent {
            role: openai_role(m.role).to_string(),
            content: m.content.clone(),
        })
        .collect();

    AnthropicChat { system, messages }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoogleHistoryItem {
    pub role: String,
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleChat {
    pub system_instruction: Option<String>,
    /// Trailing USER message, sent as the new turn. `None` when the chat ends otherwise.
    pub message: Option<String>,
    pub history: Vec<GoogleHistoryItem>,
}

pub fn format_google(chat: &[ChatMessage]) -> GoogleChat {
    let system_instruction = chat
        .iter()
        .find(|m| m.role == ChatRole::System && !m.content.is_empty())
        .map(|m| m.content.clone());

    let message = chat
        .last()
        .filter(|m| m.role == ChatRole::User && !m.content.is_empty())
        .map(|m| m.content.clone());

    let history = chat
        .iter()
        .filter(|m| {
            let duplicate_of_last =
                m.role == ChatRole::User && message.as_deref() == Some(m.content.as_str());
            !m.content.is_empty() && m.role != ChatRole::System && !duplicate_of_last
        })
        .map(|m| GoogleHistoryItem {
            role: match m.role {
                ChatRole::Model => "model",
                _ => "user",
            }
            .to_string(),
            parts: vec![m.content.clone()],
        })
        .collect();

    GoogleChat {
        system_instruction,
        message,
        history,
    }
}
