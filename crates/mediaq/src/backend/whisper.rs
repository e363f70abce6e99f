//! Local transcription through a whisper.cpp compatible command-line binary.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{BackendError, BackendOutput, Transcriber};
use crate::config::WhisperConfig;

/// Runs `<binary> -m <model> -f <media> -nt -np` and reads the transcript
/// from stdout.
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    binary: String,
    model_path: Option<PathBuf>,
    model_name: String,
    threads: Option<u32>,
}

impl WhisperTranscriber {
    pub fn new(config: &WhisperConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            model_path: config.resolved_model_path(),
            model_name: config.model_name.clone(),
            threads: config.threads,
        }
    }

    pub fn backend_name(&self) -> String {
        format!("whisper-{}", self.model_name)
    }

    fn command(&self, model: &Path, media: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-m").arg(model).arg("-f").arg(media).args(["-nt", "-np"]);
        if let Some(threads) = self.threads {
            cmd.arg("-t").arg(threads.to_string());
        }
        // A timed-out run drops the child; make sure the process goes with it.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, media_locator: &str) -> Result<BackendOutput, BackendError> {
        let media = Path::new(media_locator);
        tokio::fs::metadata(media)
            .await
            .map_err(|e| BackendError::io(media_locator, e))?;

        let model = self.model_path.as_deref().ok_or_else(|| {
            BackendError::NotConfigured("whisper model path is not set".to_string())
        })?;
        if !model.exists() {
            return Err(BackendError::NotConfigured(format!(
                "whisper model not found at {}",
                model.display()
            )));
        }

        info!(media = media_locator, model = %self.model_name, "Transcribing with whisper");
        let output = self
            .command(model, media)
            .output()
            .await
            .map_err(|e| BackendError::Process {
                program: self.binary.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(BackendError::Process {
                program: self.binary.clone(),
                detail: format_process_error(&output),
            });
        }

        let transcript = parse_transcript(&output.stdout);
        if transcript.is_empty() {
            return Err(BackendError::EmptyResponse(
                "No transcript returned from whisper".to_string(),
            ));
        }
        debug!(chars = transcript.len(), "Whisper transcript received");
        Ok(BackendOutput::new(transcript, self.backend_name()))
    }
}

/// Joins the non-empty stdout lines into one transcript.
fn parse_transcript(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_process_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exit code {}", output.status.code().unwrap_or(-1))
    } else {
        stderr
    }
}
