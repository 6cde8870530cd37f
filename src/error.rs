use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM API error ({status}): {body}")]
    LlmApi { status: u16, body: String },

    #[error("Missing OpenRouter API key.")]
    MissingApiKey,

    #[error("{0}")]
    UnsupportedProxy(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Chrome executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Remote debugging port {port} not ready after {waited_ms}ms")]
    DebugPortNotReady { port: u16, waited_ms: u64 },

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Crawl already running")]
    AlreadyRunning,

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a run ended because the caller asked it to stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(err.to_string())
    }
}

impl From<AppError> for String {
    fn from(error: AppError) -> Self {
        error.to_string()
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_reports_plain_message() {
        let err = AppError::Cancelled;
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Cancelled");
    }

    #[test]
    fn test_error_serializes_as_message() {
        let err = AppError::LlmApi { status: 429, body: "slow down".to_string() };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"LLM API error (429): slow down\"");
    }
}
