pub mod backend;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod queue;
pub mod secrets;
pub mod tracker;
pub mod worker;

pub use backend::{
    Backend, BackendError, BackendOutput, BackendRegistry, Summarizer, Transcriber,
};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError, QueueStatus};
pub use dispatcher::{Dispatcher, JobFailure, TerminalOutcome};
pub use error::{ConfigError, QueueError, Result};
pub use model::{
    Job, JobId, JobInput, JobKind, JobStatus, NewJob, NewSubmission, Submission,
    SubmissionStatus,
};
pub use queue::JobQueue;
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use tracker::SubmissionTracker;
pub use worker::{Shutdown, Worker, WorkerPool, WorkerReport, WorkerSettings, WorkerState};
