//! Error types for transcription and summarization backends.

use std::time::Duration;

use thiserror::Error;

/// Errors a backend strategy can surface.
///
/// The dispatcher converts every variant into a failed job; the `Display`
/// text is what ends up in the job's error detail.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("{0}")]
    EmptyResponse(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed: {detail}")]
    Process { program: String, detail: String },

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("backend panicked: {0}")]
    Panicked(String),

    #[error("backend not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Message(String),
}

impl BackendError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Extracts a readable message from a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }
}
