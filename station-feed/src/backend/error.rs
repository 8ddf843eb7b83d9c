//! Backend error types.

use std::fmt;

use serde::Deserialize;

/// Structured error body returned by the REST query endpoint.
///
/// Only `message` is guaranteed; the other fields are present for most
/// database-originated errors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostgrestError {
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl PostgrestError {
    /// Create an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
            hint: None,
            code: None,
        }
    }

    /// Attach a backend error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

// Display is just the message: it is what gets shown to the user.
impl fmt::Display for PostgrestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PostgrestError {}

/// Errors from the data backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The query was rejected with a structured error body
    #[error(transparent)]
    Query(#[from] PostgrestError),

    /// API returned an error status without a structured body
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Invalid or missing access key
    #[error("unauthorized: check SUPABASE_ANON_KEY")]
    Unauthorized,

    /// Failed to parse a response or push message
    #[error("JSON parse error: {message}")]
    Json {
        message: String,
        body: Option<String>,
    },

    /// Realtime websocket failure
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The push channel is no longer open
    #[error("push channel closed")]
    ChannelClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for BackendError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BackendError::WebSocket(Box::new(err))
    }
}

impl BackendError {
    /// Build a JSON error, keeping a bounded prefix of the offending body.
    pub(crate) fn json(err: serde_json::Error, body: &str) -> Self {
        BackendError::Json {
            message: err.to_string(),
            body: Some(body.chars().take(500).collect()),
        }
    }
}
