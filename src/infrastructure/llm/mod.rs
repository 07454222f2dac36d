use crate::core::error::ApiError;
use async_trait::async_trait;
use serde::Serialize;

pub mod mock;
pub mod openrouter;
pub mod retry;

pub use openrouter::OpenRouterClient;

/// One entry of the `messages` array in a chat completion request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// 一次对话补全请求
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Plain user prompt, optionally framed by a system instruction.
    pub fn new(
        model: impl Into<String>,
        system_prompt: Option<&str>,
        prompt: impl Into<String>,
        temperature: f64,
        max_tokens: u32,
    ) -> Self {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));
        Self {
            model: model.into(),
            messages,
            temperature,
            max_tokens,
        }
    }
}

/// Boundary to the upstream model provider. The production
/// implementation is [`OpenRouterClient`]; tests script a
/// [`mock::MockChatClient`] instead.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Returns the text content of the first choice.
    async fn complete(&self, request: &ChatRequest) -> Result<String, ApiError>;
}
