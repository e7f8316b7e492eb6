/*
[INPUT]:  Error sources (HTTP, API envelope, serialization, WebSocket, WAMP protocol)
[OUTPUT]: Structured error types with taxonomy and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the Poloniex adapter
#[derive(Error, Debug)]
pub enum PoloniexError {
    /// HTTP request failed (connect, TLS, timeout at the transport)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport failed
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// An operation did not complete in its bounded window
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Peer violated the stream protocol (bad handshake, rejected subscribe)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// API reported a failure inside the response envelope
    #[error("API error (code {code}): {message}")]
    Api { code: i32, message: String },

    /// Private call attempted without usable credentials
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Stream client was closed
    #[error("Stream client is closed")]
    Closed,
}

/// Coarse failure class used to decide who handles an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Decode,
    Api,
    Config,
}

impl PoloniexError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoloniexError::Http(_) | PoloniexError::WebSocket(_) | PoloniexError::Timeout { .. } => {
                ErrorKind::Transport
            }
            PoloniexError::Protocol(_) => ErrorKind::Protocol,
            PoloniexError::Serialization(_) | PoloniexError::InvalidResponse(_) => ErrorKind::Decode,
            PoloniexError::Api { .. } => ErrorKind::Api,
            PoloniexError::Authentication { .. }
            | PoloniexError::Config(_)
            | PoloniexError::UrlParse(_)
            | PoloniexError::Closed => ErrorKind::Config,
        }
    }

    /// Check if the error is retryable.
    ///
    /// API errors are never retryable: resending a signed command with a
    /// new nonce changes what the original request meant.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Protocol)
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        PoloniexError::Api {
            code: status.as_u16() as i32,
            message: message.into(),
        }
    }

    pub(crate) fn timeout(operation: &'static str, after: Duration) -> Self {
        PoloniexError::Timeout { operation, after }
    }
}

/// Result type alias for Poloniex operations
pub type Result<T> = std::result::Result<T, PoloniexError>;
