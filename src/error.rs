//! Crate-level error type.

use thiserror::Error;

/// Errors surfaced by the chat pipeline.
///
/// Each variant carries enough context to diagnose the failure without
/// needing to inspect the originating error directly.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No upstream API key was configured; the LLM path is disabled.
    #[error("COHERE_API_KEY is not set; upstream chat is disabled")]
    MissingApiKey,

    /// A TCP-level connection to the upstream could not be established.
    #[error("connection to {url} failed: {detail}")]
    Connect { url: String, detail: String },

    /// The upstream replied with a non-2xx HTTP status code.
    #[error("upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The upstream body broke off while it was being read.
    #[error("upstream stream failed: {0}")]
    Stream(String),

    #[error("config error: {0}")]
    Config(String),

    /// The message/session store rejected a write or read.
    #[error("store error: {0}")]
    Store(String),

    /// Client input was unusable (missing message, bad index, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether a fresh attempt against the upstream could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Connect { .. } | ChatError::Upstream { .. })
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
