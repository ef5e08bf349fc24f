use serde::{Deserialize, Serialize};

use crate::error::{Result, Text2SqlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatRole {
    System,
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Model, content)
    }
}

/// Checks the chat invariants: non-empty, non-blank content, and at most one
/// SYSTEM message which must come first.
pub fn validate_chat(chat: &[ChatMessage]) -> Result<()> {
    if chat.is_empty() {
        return Err(Text2SqlError::EmptyChatHistory);
    }

    for (idx, message) in chat.iter().enumerate() {
        if message.content.trim().is_empty() {
            return Err(Text2SqlError::InvalidChat(format!(
                "message {} has empty content",
                idx
            )));
        }
        if message.role == ChatRole::System && idx != 0 {
            return Err(Text2SqlError::InvalidChat(
                "a SYSTEM message may only appear first".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        Err(Text2SqlError::EmptyPrompt)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_chat() {
        let chat = vec![
            ChatMessage::system("s"),
            ChatMessage::user("u"),
            ChatMessage::model("m"),
        ];
        assert!(validate_chat(&chat).is_ok());
    }

    #[test]
    fn test_empty_chat() {
        let err = validate_chat(&[]).unwrap_err();
        assert!(matches!(err, Text2SqlError::EmptyChatHistory));
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_system_must_lead() {
        let chat = vec![ChatMessage::user("u"), ChatMessage::system("s")];
        assert!(validate_chat(&chat).is_err());
        let chat = vec![ChatMessage::system("a"), ChatMessage::system("b")];
        assert!(validate_chat(&chat).is_err());
    }

    #[test]
    fn test_blank_content_rejected() {
        assert!(validate_chat(&[ChatMessage::user("  ")]).is_err());
        assert!(matches!(validate_prompt(" \n"), Err(Text2SqlError::EmptyPrompt)));
    }

    #[test]
    fn test_role_tags() {
        let m: ChatMessage = serde_json::from_str(r#"{"role":"MODEL","content":"x"}"#).unwrap();
        assert_eq!(m.role, ChatRole::Model);
    }
}
