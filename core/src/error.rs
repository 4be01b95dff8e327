/// Error types for the chat engine
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ChatError {
    /// Whether re-issuing the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Network(_) | ChatError::Cancelled(_))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ChatError::Serialization(e.to_string())
        } else {
            ChatError::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
