//! Jobs, submissions, and the closed status domains they move through.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Queue-assigned job identifier. Monotonically increasing.
pub type JobId = i64;

/// Metadata key that requests a summarize job after a successful transcription.
pub const AUTO_SUMMARIZE_KEY: &str = "autoSummarize";
/// Metadata key carried by chained jobs pointing at the job that produced them.
pub const SOURCE_JOB_KEY: &str = "sourceJobId";
/// Metadata key that overrides the provider used for a chained summarize job.
pub const SUMMARIZE_PROVIDER_KEY: &str = "summarizeProvider";

/// Error returned when parsing one of the status/kind enums from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {domain} value '{value}'")]
pub struct ParseEnumError {
    pub domain: &'static str,
    pub value: String,
}

/// Implements the string mapping, `FromStr`, `Display`, and SQLite
/// conversions for a closed enum.
macro_rules! closed_enum {
    ($name:ident, $domain:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// All values of the domain, in lifecycle order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        domain: $domain,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: ParseEnumError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Transcribe,
    Summarize,
}

closed_enum!(JobKind, "job kind", {
    Transcribe => "transcribe",
    Summarize => "summarize",
});

/// Lifecycle of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

closed_enum!(JobStatus, "job status", {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Lifecycle of a submission. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Transcribing,
    Summarizing,
    Completed,
    Failed,
}

closed_enum!(SubmissionStatus, "submission status", {
    Pending => "pending",
    Transcribing => "transcribing",
    Summarizing => "summarizing",
    Completed => "completed",
    Failed => "failed",
});

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Failed)
    }
}

/// Job input. Transcribe jobs take a media locator, summarize jobs take text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum JobInput {
    Media(String),
    Text(String),
}

impl JobInput {
    pub fn as_str(&self) -> &str {
        match self {
            JobInput::Media(s) | JobInput::Text(s) => s,
        }
    }

    /// The kind of job this input belongs to.
    pub fn expected_kind(&self) -> JobKind {
        match self {
            JobInput::Media(_) => JobKind::Transcribe,
            JobInput::Text(_) => JobKind::Summarize,
        }
    }

    pub(crate) fn media_locator(&self) -> Option<&str> {
        match self {
            JobInput::Media(s) => Some(s),
            JobInput::Text(_) => None,
        }
    }

    pub(crate) fn text(&self) -> Option<&str> {
        match self {
            JobInput::Text(s) => Some(s),
            JobInput::Media(_) => None,
        }
    }
}

/// A request to put a new job on the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: JobKind,
    pub provider: String,
    pub input: JobInput,
    pub submission_id: Option<String>,
    pub metadata: Option<Value>,
}

impl NewJob {
    /// A transcription job over the media at `locator`.
    pub fn transcribe(locator: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Transcribe,
            provider: provider.into(),
            input: JobInput::Media(locator.into()),
            submission_id: None,
            metadata: None,
        }
    }

    /// A summarization job over literal text.
    pub fn summarize(text: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Summarize,
            provider: provider.into(),
            input: JobInput::Text(text.into()),
            submission_id: None,
            metadata: None,
        }
    }

    /// Binds the job to a submission.
    pub fn for_submission(mut self, submission_id: impl Into<String>) -> Self {
        self.submission_id = Some(submission_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A persisted job row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub provider: String,
    pub input: JobInput,
    pub output_text: Option<String>,
    pub error_message: Option<String>,
    pub submission_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub model_used: Option<String>,
}

impl Job {
    /// Reads a boolean flag from the job's metadata payload.
    pub fn metadata_flag(&self, key: &str) -> bool {
        metadata_flag(self.metadata.as_ref(), key)
    }

    /// Reads a string entry from the job's metadata payload.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

pub(crate) fn metadata_flag(metadata: Option<&Value>, key: &str) -> bool {
    metadata
        .and_then(|m| m.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// A request to register an uploaded media item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewSubmission {
    /// Externally supplied identifier.
    pub id: String,
    pub file_path: String,
    pub original_filename: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub metadata: Option<Value>,
}

impl NewSubmission {
    pub fn new(id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            ..Default::default()
        }
    }

    /// MIME type to persist: the explicit one, else a guess from the path.
    pub fn resolved_mime_type(&self) -> Option<String> {
        self.mime_type.clone().or_else(|| {
            mime_guess::from_path(Path::new(&self.file_path))
                .first()
                .map(|m| m.to_string())
        })
    }
}

/// A persisted submission row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub file_path: String,
    pub original_filename: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub transcript: Option<String>,
    pub transcript_job_id: Option<JobId>,
    pub transcribed_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub summary_job_id: Option<JobId>,
    pub summarized_at: Option<DateTime<Utc>>,
    pub status: SubmissionStatus,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn metadata_flag(&self, key: &str) -> bool {
        metadata_flag(self.metadata.as_ref(), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), *status);
        }
        for status in SubmissionStatus::ALL {
            assert_eq!(
                status.as_str().parse::<SubmissionStatus>().unwrap(),
                *status
            );
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "queued".parse::<JobStatus>().unwrap_err();
        assert_eq!(err.domain, "job status");
        assert_eq!(err.to_string(), "unknown job status value 'queued'");
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(SubmissionStatus::Failed.is_terminal());
        assert!(!SubmissionStatus::Summarizing.is_terminal());
    }

    #[test]
    fn test_new_job_builders() {
        let job = NewJob::transcribe("/uploads/a.wav", "deepgram")
            .for_submission("sub-1")
            .with_metadata(json!({ "autoSummarize": true }));
        assert_eq!(job.kind, JobKind::Transcribe);
        assert_eq!(job.input, JobInput::Media("/uploads/a.wav".to_string()));
        assert_eq!(job.submission_id.as_deref(), Some("sub-1"));
        assert!(metadata_flag(job.metadata.as_ref(), AUTO_SUMMARIZE_KEY));

        let job = NewJob::summarize("hello", "local");
        assert_eq!(job.input.expected_kind(), JobKind::Summarize);
        assert!(job.metadata.is_none());
    }

    #[test]
    fn test_metadata_flag_requires_boolean_true() {
        assert!(!metadata_flag(Some(&json!({ "autoSummarize": "true" })), AUTO_SUMMARIZE_KEY));
        assert!(!metadata_flag(Some(&json!({ "autoSummarize": false })), AUTO_SUMMARIZE_KEY));
        assert!(!metadata_flag(None, AUTO_SUMMARIZE_KEY));
        assert!(metadata_flag(Some(&json!({ "autoSummarize": true })), AUTO_SUMMARIZE_KEY));
    }

    #[test]
    fn test_submission_mime_type_detection() {
        let sub = NewSubmission::new("s1", "/uploads/meeting.mp3");
        assert_eq!(sub.resolved_mime_type().as_deref(), Some("audio/mpeg"));

        let mut sub = NewSubmission::new("s2", "/uploads/meeting.mp3");
        sub.mime_type = Some("audio/custom".to_string());
        assert_eq!(sub.resolved_mime_type().as_deref(), Some("audio/custom"));

        let sub = NewSubmission::new("s3", "/uploads/blob.xyz123");
        assert!(sub.resolved_mime_type().is_none());
    }
}
