pub mod openai;
pub mod provider;
pub mod types;

pub use openai::{OpenAIProvider, ProviderConfig};
pub use provider::{CompletionProvider, ProviderError, Result};
pub use types::{ChatCompletion, ChatCompletionRequest, Choice, Usage, CHAT_COMPLETION_OBJECT};
