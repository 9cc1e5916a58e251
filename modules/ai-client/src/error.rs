use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("OpenAI API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("No content in completion response")]
    EmptyResponse,

    #[error("Failed to deserialize response: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AiError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Network(_) | AiError::Timeout => true,
            AiError::Api { status, .. } => *status == 429 || *status >= 500,
            AiError::EmptyResponse | AiError::Parse(_) | AiError::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout
        } else if err.is_decode() {
            AiError::Parse(err.to_string())
        } else {
            AiError::Network(err.to_string())
        }
    }
}
