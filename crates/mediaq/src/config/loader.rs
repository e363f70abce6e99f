use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: &str| {
        Err(ConfigError::Validation {
            message: message.to_string(),
        })
    };

    if config.poll_interval_secs == 0 {
        return invalid("pollIntervalSecs must be greater than zero");
    }
    if config.workers == 0 {
        return invalid("workers must be at least 1");
    }
    if config.timeouts.transcribe_secs == 0 || config.timeouts.summarize_secs == 0 {
        return invalid("timeouts must be greater than zero");
    }
    if config.chain.summarize_provider.trim().is_empty() {
        return invalid("chain.summarizeProvider must not be empty");
    }
    if config.whisper.binary.trim().is_empty() {
        return invalid("whisper.binary must not be empty");
    }
    if config.whisper.model_name.trim().is_empty() {
        return invalid("whisper.modelName must not be empty");
    }
    if config.ollama.model.trim().is_empty() {
        return invalid("ollama.model must not be empty");
    }
    if !(0.0..=2.0).contains(&config.ollama.temperature) {
        return invalid("ollama.temperature must be between 0 and 2");
    }
    if config.deepgram.request_timeout_secs == 0 || config.ollama.request_timeout_secs == 0 {
        return invalid("requestTimeoutSecs must be greater than zero");
    }

    Ok(())
}
