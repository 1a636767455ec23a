use thiserror::Error;
use serde::Serialize;

/// Common error type for ctxstream with clear taxonomy
#[derive(Error, Debug)]
pub enum Error {
    /// Client request errors (4xx)
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Request validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Service availability errors (5xx)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Generation backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Generation errors, reported in-band as error fragments
    #[error("{0}")]
    Generation(String),

    #[error("Prompt rejected: {0}")]
    PromptRejected(String),

    /// Transport errors
    #[error("Fragment channel closed")]
    ChannelClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO and serialization errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic anyhow error for flexibility
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            // 4xx Client Errors
            Error::BadRequest(_) => 400,
            Error::ValidationFailed(_) => 400,
            Error::UnknownAction(_) => 400,
            Error::PromptRejected(_) => 422,

            // 5xx Server Errors
            Error::ServiceUnavailable(_) => 503,
            Error::BackendUnavailable(_) => 503,

            // Generation / transport
            Error::Generation(_) => 500,
            Error::ChannelClosed => 499,
            Error::Transport(_) => 502,

            // Internal Errors
            Error::Internal(_) => 500,
            Error::ConfigError(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Anyhow(_) => 500,
        }
    }

    /// Get error type for metrics/logging
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "bad_request",
            Error::ValidationFailed(_) => "validation_failed",
            Error::UnknownAction(_) => "unknown_action",
            Error::PromptRejected(_) => "prompt_rejected",
            Error::ServiceUnavailable(_) => "service_unavailable",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::Generation(_) => "generation_error",
            Error::ChannelClosed => "channel_closed",
            Error::Transport(_) => "transport_error",
            Error::Internal(_) => "internal",
            Error::ConfigError(_) => "config_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Anyhow(_) => "unknown",
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ServiceUnavailable(_) |
            Error::BackendUnavailable(_) |
            Error::Io(_)
        )
    }
}

/// Error response for HTTP API
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: u16,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        ErrorResponse {
            error: ErrorDetail {
                message: err.to_string(),
                r#type: err.error_type().to_string(),
                code: err.status_code(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
