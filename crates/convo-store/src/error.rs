use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("time parse error: {0}")]
    Chrono(#[from] chrono::ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage task join error: {0}")]
    Task(String),

    #[error("message not found: {0}")]
    NotFound(String),

    #[error("message {0} is not a conversation root")]
    NotRoot(String),

    #[error("replay script rejected: {0}")]
    RejectedScript(String),

    #[error("invalid stored data: {0}")]
    InvalidData(String),
}
