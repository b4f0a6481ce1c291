//! Generation adapter errors.

use story_models::ScriptError;
use thiserror::Error;

pub type GenAiResult<T> = Result<T, GenAiError>;

#[derive(Debug, Error)]
pub enum GenAiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {service}: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("All script models failed: {0}")]
    AllModelsFailed(String),
}

impl GenAiError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_response(service: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service,
            message: message.into(),
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            GenAiError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            GenAiError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
