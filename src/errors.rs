use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("runtime error during execution: {0}")]
    Runtime(String),

    #[error("execution cancelled")]
    Cancelled,

    // Helper failures carry generic, user-safe messages. The real cause is
    // logged server-side and must never reach sandboxed code or end users.
    #[error("AI processing failed")]
    AiFailed,

    #[error("Failed to store data")]
    StoreFailed,

    #[error("Failed to query data")]
    QueryFailed,

    #[error("HTTP request failed")]
    HttpFailed,

    #[error("blocked URL: {0}")]
    BlockedUrl(String),

    #[error("unknown helper method: {0}")]
    UnknownHelper(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
