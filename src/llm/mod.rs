//! Outbound LLM completion client.
//!
//! `LlmClient` wraps a closed set of provider backends with retry and usage
//! accounting. Callers depend on the [`CompletionApi`] trait so tests can swap
//! in scripted clients.

pub mod anthropic;
pub mod client;
pub mod json;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod openai;
pub mod retry;
pub mod types;
pub mod usage;

pub use client::*;
pub use json::*;
pub use retry::*;
pub use types::*;
pub use usage::*;

use thiserror::Error;

/// Upstream-service failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Cannot reach LLM endpoint {0}")]
    Connection(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM rate limit hit: {0}")]
    RateLimited(String),

    #[error("LLM service error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("LLM rejected credentials (status {status})")]
    Authentication { status: u16 },

    #[error("LLM rejected request (status {status}): {body}")]
    InvalidRequest { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    #[error("No API key configured for {0}")]
    MissingApiKey(String),

    #[error("LLM call failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LlmError> },
}

impl LlmError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Connection(_)
                | LlmError::Timeout(_)
                | LlmError::RateLimited(_)
                | LlmError::Server { .. }
        )
    }

    /// Map a non-success HTTP status to an error kind.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => LlmError::Authentication { status },
            429 => LlmError::RateLimited(body),
            500..=599 => LlmError::Server { status, body },
            _ => LlmError::InvalidRequest { status, body },
        }
    }

    pub(crate) fn from_transport(e: reqwest::Error, endpoint: &str, timeout_secs: u64) -> Self {
        if e.is_connect() {
            LlmError::Connection(endpoint.to_string())
        } else if e.is_timeout() {
            LlmError::Timeout(timeout_secs)
        } else {
            LlmError::HttpClient(e.to_string())
        }
    }
}
