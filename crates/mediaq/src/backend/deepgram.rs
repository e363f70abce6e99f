//! Remote transcription through the Deepgram `/v1/listen` API.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use super::{BackendError, BackendOutput, Transcriber};
use crate::config::DeepgramConfig;
use crate::error::ConfigError;

const DEFAULT_CONTENT_TYPE: &str = "audio/wav";

#[derive(Debug, Default, Deserialize)]
struct ListenResponse {
    #[serde(default)]
    results: Option<ListenResults>,
}

#[derive(Debug, Default, Deserialize)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Debug, Default, Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Default, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

impl ListenResponse {
    /// The first alternative of the first channel, if any.
    fn into_transcript(self) -> Option<String> {
        self.results?
            .channels
            .into_iter()
            .next()?
            .alternatives
            .into_iter()
            .next()
            .map(|a| a.transcript)
            .filter(|t| !t.trim().is_empty())
    }
}

pub struct DeepgramTranscriber {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl std::fmt::Debug for DeepgramTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepgramTranscriber")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl DeepgramTranscriber {
    pub fn new(config: &DeepgramConfig, api_key: Option<SecretString>) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Validation {
                message: format!("failed to build Deepgram HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    pub fn backend_name(&self) -> String {
        format!("deepgram-{}", self.model)
    }
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn transcribe(&self, media_locator: &str) -> Result<BackendOutput, BackendError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            BackendError::NotConfigured("Deepgram API key is not set".to_string())
        })?;

        let audio = tokio::fs::read(media_locator)
            .await
            .map_err(|e| BackendError::io(media_locator, e))?;

        info!(media = media_locator, bytes = audio.len(), "Transcribing with Deepgram");
        let response = self
            .client
            .post(format!("{}/v1/listen", self.base_url))
            .header(AUTHORIZATION, format!("Token {}", api_key.expose_secret()))
            .header(CONTENT_TYPE, content_type_for(Path::new(media_locator)))
            .query(&[
                ("model", self.model.as_str()),
                ("smart_format", "true"),
                ("punctuate", "true"),
                ("paragraphs", "true"),
            ])
            .body(audio)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ListenResponse = response.json().await?;
        let transcript = parsed.into_transcript().ok_or_else(|| {
            BackendError::EmptyResponse("No transcript returned from Deepgram".to_string())
        })?;
        debug!(chars = transcript.len(), "Deepgram transcript received");
        Ok(BackendOutput::new(transcript, self.backend_name()))
    }
}

/// Audio content type from the file extension, `audio/wav` when unknown.
fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .iter()
        .find(|m| matches!(m.type_().as_str(), "audio" | "video"))
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}
