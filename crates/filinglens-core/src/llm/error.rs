use thiserror::Error;

/// Errors that can occur during model calls.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Missing API key. Set FILINGLENS_API_KEYS or GEMINI_API_KEY.")]
    MissingApiKey,

    #[error("API returned error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limited. Try again later.")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Empty response from model")]
    EmptyResponse,
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Network(err.to_string())
    }
}
