//! Chat-completion client abstraction.
//!
//! [`ChatModel`] is the seam between the analysis pipeline and whichever provider answers the
//! prompt. Responses carry the generated text plus the provider's usage metadata, which the
//! parser later turns into token counts.

mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use openai::OpenAiChatModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Token counts as reported by the provider. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub token_usage: Option<TokenUsage>,
    pub model_name: Option<String>,
}

/// Raw model reply: text content plus response metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatOutput {
    pub content: String,
    pub response_metadata: ResponseMetadata,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the conversation and return the first completion.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ChatOutput>;
}
