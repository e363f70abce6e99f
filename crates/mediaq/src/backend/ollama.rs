//! Summarization through an Ollama server's `/api/generate` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BackendError, BackendOutput, Summarizer};
use crate::config::OllamaConfig;
use crate::error::ConfigError;

const UNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct UnloadRequest<'a> {
    model: &'a str,
    keep_alive: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Wraps a transcript in the summarization prompt.
pub fn summary_prompt(text: &str) -> String {
    format!(
        "Summarize the following transcript concisely. Include:\n\
         - Main topics discussed\n\
         - Key points and takeaways\n\
         - Overall sentiment/tone\n\
         \n\
         Transcript:\n\
         {text}\n\
         \n\
         Summary:"
    )
}

#[derive(Debug, Clone)]
pub struct OllamaSummarizer {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    num_predict: u32,
}

impl OllamaSummarizer {
    pub fn new(config: &OllamaConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Validation {
                message: format!("failed to build Ollama HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            num_predict: config.num_predict,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, text: &str) -> Result<BackendOutput, BackendError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: summary_prompt(text),
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.num_predict,
            },
        };

        info!(model = %self.model, chars = text.len(), "Generating summary with Ollama");
        let response = self
            .client
            .post(self.generate_url())
            .json(&request)
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

        let parsed: GenerateResponse = response.json().await?;
        let summary = parsed.response.trim();
        if summary.is_empty() {
            return Err(BackendError::EmptyResponse(
                "No summary returned from Ollama".to_string(),
            ));
        }
        debug!(chars = summary.len(), "Ollama summary received");
        Ok(BackendOutput::new(summary, self.model.clone()))
    }

    /// Asks the server to unload the model right away.
    async fn release(&self) {
        let request = UnloadRequest {
            model: &self.model,
            keep_alive: 0,
        };
        let result = self
            .client
            .post(self.generate_url())
            .timeout(UNLOAD_TIMEOUT)
            .json(&request)
            .send()
            .await;
        match result {
            Ok(_) => debug!(model = %self.model, "Unloaded Ollama model"),
            Err(e) => debug!(model = %self.model, error = %e, "Ollama unload request failed"),
        }
    }
}
