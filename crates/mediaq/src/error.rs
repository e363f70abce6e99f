use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::model::{JobId, JobStatus};

/// Errors returned by the queue and submission APIs.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Malformed enqueue request, rejected before anything is persisted.
    #[error("Invalid job: {0}")]
    InvalidJobSpec(String),

    /// A terminal update was attempted on a job that is not `processing`.
    #[error("Invalid state transition for job {job_id}: {from} -> {to}")]
    InvalidStateTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {0} not found")]
    JobNotFound(JobId),

    #[error("Submission '{0}' not found")]
    SubmissionNotFound(String),

    #[error("Submission '{0}' already exists")]
    DuplicateSubmission(String),

    /// The store could not be reached or rejected the operation.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] DatabaseError),
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::StoreUnavailable(DatabaseError::Sqlite(e))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Secret '{name}' could not be resolved: {reason}")]
    Secret { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, QueueError>;
