use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::db::default_database_path;
use crate::error::ConfigError;
use crate::model::JobKind;
use crate::secrets::{expand_home, resolve_secret_optional};

/// Runtime configuration. Every field has a default, so `{}` is a valid
/// config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Store location. Defaults to `~/.mediaq/data/queue.db`.
    pub database_path: Option<String>,
    pub poll_interval_secs: u64,
    pub pacing_delay_ms: u64,
    pub error_cooldown_secs: u64,
    pub workers: usize,
    pub timeouts: TimeoutsConfig,
    pub chain: ChainConfig,
    pub whisper: WhisperConfig,
    pub deepgram: DeepgramConfig,
    pub ollama: OllamaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            poll_interval_secs: 2,
            pacing_delay_ms: 1000,
            error_cooldown_secs: 5,
            workers: 1,
            timeouts: TimeoutsConfig::default(),
            chain: ChainConfig::default(),
            whisper: WhisperConfig::default(),
            deepgram: DeepgramConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Config {
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match self.database_path.as_deref() {
            Some(path) => Ok(PathBuf::from(expand_home(path))),
            None => default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "databasePath is not set and no home directory was found".to_string(),
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }
}

/// Per-kind bounds the dispatcher applies around a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutsConfig {
    pub transcribe_secs: u64,
    pub summarize_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            transcribe_secs: 600,
            summarize_secs: 120,
        }
    }
}

impl TimeoutsConfig {
    pub fn for_kind(&self, kind: JobKind) -> Duration {
        Duration::from_secs(match kind {
            JobKind::Transcribe => self.transcribe_secs,
            JobKind::Summarize => self.summarize_secs,
        })
    }
}

/// Follow-up job settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainConfig {
    /// Provider for summarize jobs created after a transcription.
    pub summarize_provider: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            summarize_provider: "local".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhisperConfig {
    pub binary: String,
    /// Model file. Defaults to `~/.mediaq/models/ggml-<modelName>.bin`.
    pub model_path: Option<String>,
    pub model_name: String,
    pub threads: Option<u32>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            binary: "whisper-cli".to_string(),
            model_path: None,
            model_name: "large-v3".to_string(),
            threads: None,
        }
    }
}

impl WhisperConfig {
    pub fn resolved_model_path(&self) -> Option<PathBuf> {
        match self.model_path.as_deref() {
            Some(path) => Some(PathBuf::from(expand_home(path))),
            None => dirs::home_dir().map(|home| {
                home.join(".mediaq")
                    .join("models")
                    .join(format!("ggml-{}.bin", self.model_name))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeepgramConfig {
    pub base_url: String,
    pub model: String,
    /// Direct API key. Prefer `apiKeyFile` or `apiKeyEnvVar`.
    pub api_key: Option<String>,
    pub api_key_file: Option<String>,
    pub api_key_env_var: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepgram.com".to_string(),
            model: "nova-2".to_string(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: Some("DEEPGRAM_API_KEY".to_string()),
            request_timeout_secs: 300,
        }
    }
}

impl DeepgramConfig {
    /// The API key from the first configured source, if any.
    pub fn resolve_api_key(&self) -> Result<Option<SecretString>, ConfigError> {
        resolve_secret_optional(
            self.api_key.as_deref(),
            self.api_key_file.as_deref(),
            self.api_key_env_var.as_deref(),
        )
        .map_err(|e| ConfigError::Secret {
            name: "deepgram.apiKey".to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub num_predict: u32,
    pub request_timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            temperature: 0.3,
            num_predict: 500,
            request_timeout_secs: 120,
        }
    }
}
