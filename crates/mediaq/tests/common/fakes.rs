//! Backends whose behavior is fixed up front.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use mediaq::{BackendError, BackendOutput, Summarizer, Transcriber};

/// What a scripted backend does when called.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
    /// Sleeps far longer than any test timeout.
    Hang,
    /// Waits until the gate is opened, then returns the text.
    Gated(Arc<Notify>, String),
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Reply::Text(text.to_string())
    }

    pub fn fail(message: &str) -> Self {
        Reply::Fail(message.to_string())
    }

    async fn play(&self, name: &str) -> Result<BackendOutput, BackendError> {
        match self {
            Reply::Text(text) => Ok(BackendOutput::new(text.clone(), name)),
            Reply::Fail(message) => Err(BackendError::Message(message.clone())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(BackendError::Message("unreachable".to_string()))
            }
            Reply::Gated(gate, text) => {
                gate.notified().await;
                Ok(BackendOutput::new(text.clone(), name))
            }
        }
    }
}

#[derive(Debug)]
pub struct ScriptedTranscriber {
    reply: Reply,
    pub calls: AtomicUsize,
    pub releases: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _media_locator: &str) -> Result<BackendOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.play("fake-whisper").await
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct ScriptedSummarizer {
    reply: Reply,
    pub calls: AtomicUsize,
    pub releases: AtomicUsize,
}

impl ScriptedSummarizer {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, text: &str) -> Result<BackendOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Reply::Text(prefix) => Ok(BackendOutput::new(
                format!("{prefix}: {text}"),
                "fake-llama",
            )),
            other => other.play("fake-llama").await,
        }
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
