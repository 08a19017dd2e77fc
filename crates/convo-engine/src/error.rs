use convo_llm::ProviderError;
use convo_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("message not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    /// Errors the fail-soft entry points swallow into an empty result.
    pub fn is_fail_soft(&self) -> bool {
        matches!(
            self,
            EngineError::Provider(_) | EngineError::Integrity(_) | EngineError::Serialization(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Store(other),
        }
    }
}
