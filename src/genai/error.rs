//! Error types for generative API calls.

use std::fmt;

/// Broad classes of generative API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenAiErrorKind {
    /// No API key configured
    MissingApiKey,
    /// Connection failure or timeout
    Network,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    ServerError,
    /// HTTP 4xx other than 429
    ClientError,
    /// Response body did not have the expected shape
    Parse,
    /// Response parsed but carried no usable text
    EmptyResponse,
}

impl fmt::Display for GenAiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingApiKey => "missing_api_key",
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Parse => "parse",
            Self::EmptyResponse => "empty_response",
        };
        f.write_str(s)
    }
}

/// Map an HTTP status code onto an error kind.
pub fn classify_http_status(status: u16) -> GenAiErrorKind {
    match status {
        429 => GenAiErrorKind::RateLimited,
        500..=599 => GenAiErrorKind::ServerError,
        400..=499 => GenAiErrorKind::ClientError,
        _ => GenAiErrorKind::ServerError,
    }
}

/// A failed generative API call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct GenAiError {
    pub kind: GenAiErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl GenAiError {
    pub fn missing_api_key() -> Self {
        Self {
            kind: GenAiErrorKind::MissingApiKey,
            status: None,
            message: "Generative API key is not configured".to_string(),
        }
    }

    pub fn network_error(message: String) -> Self {
        Self {
            kind: GenAiErrorKind::Network,
            status: None,
            message,
        }
    }

    pub fn http(status: u16, message: String) -> Self {
        Self {
            kind: classify_http_status(status),
            status: Some(status),
            message,
        }
    }

    pub fn parse_error(message: String) -> Self {
        Self {
            kind: GenAiErrorKind::Parse,
            status: None,
            message,
        }
    }

    pub fn empty_response() -> Self {
        Self {
            kind: GenAiErrorKind::EmptyResponse,
            status: None,
            message: "Model returned an empty response".to_string(),
        }
    }
}
