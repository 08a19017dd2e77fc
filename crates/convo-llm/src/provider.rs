use async_trait::async_trait;
use convo_core::ChatMessage;
use thiserror::Error;

use crate::types::ChatCompletion;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected object type: {0:?}")]
    UnexpectedObject(String),

    #[error("completion returned no choices")]
    EmptyChoices,
}

impl ProviderError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(err) if err.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// A chat-completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Request one completion for `messages` (root first) from `model`.
    ///
    /// Implementations return only validated completions: the object tag is
    /// `chat.completion` and there is at least one choice.
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatCompletion>;
}
