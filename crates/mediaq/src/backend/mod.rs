//! Backend strategies and the registry the dispatcher resolves them from.
//!
//! A backend is selected by `(job kind, provider)`. Transcribers take a media
//! locator, summarizers take literal text; both return the produced text and
//! the name of the model that produced it.

pub mod deepgram;
pub mod error;
pub mod ollama;
pub mod whisper;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::ConfigError;
use crate::model::JobKind;

pub use deepgram::DeepgramTranscriber;
pub use error::BackendError;
pub use ollama::OllamaSummarizer;
pub use whisper::WhisperTranscriber;

/// Text produced by a backend plus the model/backend name to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutput {
    pub text: String,
    pub backend_name: String,
}

impl BackendOutput {
    pub fn new(text: impl Into<String>, backend_name: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            backend_name: backend_name.into(),
        }
    }
}

/// Turns a media file into a transcript.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, media_locator: &str) -> Result<BackendOutput, BackendError>;

    /// Frees whatever the last call acquired. Called after every run,
    /// whatever its outcome.
    async fn release(&self) {}
}

/// Turns text into a summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<BackendOutput, BackendError>;

    /// See [`Transcriber::release`].
    async fn release(&self) {}
}

/// A registered strategy, tagged by capability.
#[derive(Clone)]
pub enum Backend {
    Transcriber(Arc<dyn Transcriber>),
    Summarizer(Arc<dyn Summarizer>),
}

impl Backend {
    pub fn kind(&self) -> JobKind {
        match self {
            Backend::Transcriber(_) => JobKind::Transcribe,
            Backend::Summarizer(_) => JobKind::Summarize,
        }
    }

    pub async fn release(&self) {
        match self {
            Backend::Transcriber(t) => t.release().await,
            Backend::Summarizer(s) => s.release().await,
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Transcriber(_) => f.write_str("Backend::Transcriber"),
            Backend::Summarizer(_) => f.write_str("Backend::Summarizer"),
        }
    }
}

/// Maps `(kind, provider)` to a strategy. Lookups fail closed.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<(JobKind, String), Backend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry of concrete backends described by `config`:
    /// `local` and `deepgram` transcription, `local` summarization.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        registry.register_transcriber("local", Arc::new(WhisperTranscriber::new(&config.whisper)));
        registry.register_transcriber(
            "deepgram",
            Arc::new(DeepgramTranscriber::new(
                &config.deepgram,
                config.deepgram.resolve_api_key()?,
            )?),
        );
        registry.register_summarizer("local", Arc::new(OllamaSummarizer::new(&config.ollama)?));
        Ok(registry)
    }

    pub fn register_transcriber(
        &mut self,
        provider: impl Into<String>,
        transcriber: Arc<dyn Transcriber>,
    ) -> &mut Self {
        self.register(provider.into(), Backend::Transcriber(transcriber))
    }

    pub fn register_summarizer(
        &mut self,
        provider: impl Into<String>,
        summarizer: Arc<dyn Summarizer>,
    ) -> &mut Self {
        self.register(provider.into(), Backend::Summarizer(summarizer))
    }

    fn register(&mut self, provider: String, backend: Backend) -> &mut Self {
        self.backends.insert((backend.kind(), provider), backend);
        self
    }

    pub fn resolve(&self, kind: JobKind, provider: &str) -> Option<Backend> {
        self.backends.get(&(kind, provider.to_string())).cloned()
    }

    /// Registered provider names for `kind`, sorted.
    pub fn providers(&self, kind: JobKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .backends
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}
