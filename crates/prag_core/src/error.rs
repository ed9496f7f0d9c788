use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes shared by every layer. Callers branch on these, not on messages.
pub mod codes {
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    pub const CONFIG_READ_FAILED: &str = "CONFIG_READ_FAILED";

    pub const LOAD_FAILED: &str = "LOAD_FAILED";
    pub const LOAD_DIR_INVALID: &str = "LOAD_DIR_INVALID";

    pub const EMBEDDING_UNAVAILABLE: &str = "EMBEDDING_UNAVAILABLE";
    pub const EMBEDDING_FAILED: &str = "EMBEDDING_FAILED";
    pub const GENERATION_UNAVAILABLE: &str = "GENERATION_UNAVAILABLE";
    pub const GENERATION_FAILED: &str = "GENERATION_FAILED";
    pub const PROVIDER_TIMEOUT: &str = "PROVIDER_TIMEOUT";
    pub const AI_REMOTE_NOT_ALLOWED: &str = "AI_REMOTE_NOT_ALLOWED";
    pub const AI_OLLAMA_UNREACHABLE: &str = "AI_OLLAMA_UNREACHABLE";
    pub const AI_OLLAMA_UNHEALTHY: &str = "AI_OLLAMA_UNHEALTHY";
    pub const AI_MODEL_PULL_FAILED: &str = "AI_MODEL_PULL_FAILED";

    pub const INDEX_EMPTY: &str = "INDEX_EMPTY";
    pub const INDEX_CORRUPT: &str = "INDEX_CORRUPT";
    pub const INDEX_OPEN_FAILED: &str = "INDEX_OPEN_FAILED";
    pub const INDEX_WRITE_FAILED: &str = "INDEX_WRITE_FAILED";
    pub const INDEX_DIMS_MISMATCH: &str = "INDEX_DIMS_MISMATCH";

    pub const QUERY_INVALID: &str = "QUERY_INVALID";
    pub const RETRIEVAL_FAILED: &str = "RETRIEVAL_FAILED";

    pub const TIME_FORMAT_FAILED: &str = "TIME_FORMAT_FAILED";
    pub const OUTPUT_FAILED: &str = "OUTPUT_FAILED";
}

/// Single structured error shape used across the core, the AI layer and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    /// Message plus details, for reports shown to a person.
    pub fn reason(&self) -> String {
        match self.details.as_deref() {
            Some(d) if !d.is_empty() => format!("{} ({d})", self.message),
            _ => self.message.clone(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
