use convo_core::{ChatMessage, TokenUsage};
use serde::{Deserialize, Serialize};

use crate::provider::{ProviderError, Result};

pub const CHAT_COMPLETION_OBJECT: &str = "chat.completion";

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    /// Epoch seconds.
    pub created: i64,
    pub model: String,
    #[serde(default)]
    pub system_fingerprint: Option<String>,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub message: Option<ChatMessage>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        Self {
            completion_tokens: usage.completion_tokens,
            prompt_tokens: usage.prompt_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl ChatCompletion {
    /// Parse a response body and check its structure.
    pub fn from_body(body: &str) -> Result<Self> {
        let completion: ChatCompletion = serde_json::from_str(body)?;
        completion.validate()
    }

    pub fn validate(self) -> Result<Self> {
        if self.object != CHAT_COMPLETION_OBJECT {
            return Err(ProviderError::UnexpectedObject(self.object));
        }
        if self.choices.is_empty() {
            return Err(ProviderError::EmptyChoices);
        }
        Ok(self)
    }
}
