use std::time::Duration;

use async_trait::async_trait;
use convo_core::{ChatMessage, Config};
use reqwest::Client;

use crate::provider::{CompletionProvider, ProviderError, Result};
use crate::types::{ChatCompletion, ChatCompletionRequest};

/// Explicit client configuration. Nothing here is read from the environment.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    /// Bounds connecting and sending the request.
    pub write_timeout: Duration,
    /// Bounds each read of the response.
    pub read_timeout: Duration,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::from(&Config::default())
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base = url.into();
        self
    }

    pub fn with_timeouts(mut self, write: Duration, read: Duration) -> Self {
        self.write_timeout = write;
        self.read_timeout = read;
        self
    }
}

impl From<&Config> for ProviderConfig {
    fn from(config: &Config) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            write_timeout: Duration::from_secs(config.write_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
        }
    }
}

/// Non-streaming client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.write_timeout)
            .read_timeout(config.read_timeout)
            .timeout(config.write_timeout + config.read_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatCompletion> {
        let endpoint = self.endpoint();
        let request = ChatCompletionRequest { model, messages };
        log::debug!(
            "Calling [{}] with:\n{}",
            endpoint,
            serde_json::to_string(&request)?
        );

        let mut builder = self.client.post(&endpoint).json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }
        let response = builder.send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::error!("HTTP error from [{}] - {}\n{}", endpoint, status, body);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        ChatCompletion::from_body(&body)
    }
}
