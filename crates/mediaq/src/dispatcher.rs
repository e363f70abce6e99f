//! Runs a claimed job through its backend and records the outcome.
//!
//! Backend errors, timeouts and panics all end as a failed job. Only store
//! errors are returned to the caller.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use rusqlite::Connection;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backend::{Backend, BackendError, BackendOutput, BackendRegistry};
use crate::config::{ChainConfig, Config, TimeoutsConfig};
use crate::db::submission_repo;
use crate::error::{QueueError, Result};
use crate::model::{
    Job, JobId, JobInput, JobKind, NewJob, AUTO_SUMMARIZE_KEY, SOURCE_JOB_KEY,
    SUMMARIZE_PROVIDER_KEY,
};
use crate::queue::JobQueue;

/// Why a job failed. The `Display` text is persisted as the error detail.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("Unknown provider '{provider}' for {kind} jobs")]
    UnknownProvider { kind: JobKind, provider: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// The terminal state a dispatched job reached.
#[derive(Debug)]
pub enum TerminalOutcome {
    Completed {
        job_id: JobId,
        backend_name: String,
        duration_ms: i64,
        /// Summarize job enqueued as a follow-up, if any.
        chained_job: Option<JobId>,
    },
    Failed {
        job_id: JobId,
        failure: JobFailure,
    },
}

impl TerminalOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            TerminalOutcome::Completed { job_id, .. } | TerminalOutcome::Failed { job_id, .. } => {
                *job_id
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TerminalOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: JobQueue,
    registry: Arc<BackendRegistry>,
    timeouts: TimeoutsConfig,
    chain: ChainConfig,
}

impl Dispatcher {
    pub fn new(queue: JobQueue, registry: Arc<BackendRegistry>, config: &Config) -> Self {
        Self::with_settings(queue, registry, config.timeouts.clone(), config.chain.clone())
    }

    pub fn with_settings(
        queue: JobQueue,
        registry: Arc<BackendRegistry>,
        timeouts: TimeoutsConfig,
        chain: ChainConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            timeouts,
            chain,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Drives a `processing` job to a terminal state.
    pub async fn dispatch(&self, job: &Job) -> Result<TerminalOutcome> {
        let span = info_span!(
            "job",
            job.id = job.id,
            job.kind = %job.kind,
            job.provider = %job.provider
        );
        self.dispatch_inner(job).instrument(span).await
    }

    async fn dispatch_inner(&self, job: &Job) -> Result<TerminalOutcome> {
        let Some(backend) = self.registry.resolve(job.kind, &job.provider) else {
            return self.record_failure(
                job,
                JobFailure::UnknownProvider {
                    kind: job.kind,
                    provider: job.provider.clone(),
                },
            );
        };

        let limit = self.timeouts.for_kind(job.kind);
        let started = Instant::now();
        let result = run_guarded(&backend, &job.input, limit).await;
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        match result {
            Ok(output) => self.record_success(job, output, duration_ms),
            Err(e) => self.record_failure(job, JobFailure::Backend(e)),
        }
    }

    fn record_success(
        &self,
        job: &Job,
        output: BackendOutput,
        duration_ms: i64,
    ) -> Result<TerminalOutcome> {
        let chained_job = self.queue.complete_then(
            job.id,
            &output.text,
            &output.backend_name,
            duration_ms,
            |conn, job| self.enqueue_follow_up(conn, job, &output.text),
        )?;

        Ok(TerminalOutcome::Completed {
            job_id: job.id,
            backend_name: output.backend_name,
            duration_ms,
            chained_job,
        })
    }

    fn record_failure(&self, job: &Job, failure: JobFailure) -> Result<TerminalOutcome> {
        self.queue.mark_failed(job.id, &failure.to_string())?;
        Ok(TerminalOutcome::Failed {
            job_id: job.id,
            failure,
        })
    }

    /// Enqueues the summarize job for a finished transcription when the job
    /// or its submission asks for one. Runs in the completion transaction,
    /// after the transcript has been recorded on the submission.
    ///
    /// A follow-up the queue rejects is skipped so the completion still
    /// commits. Only store errors abort it.
    fn enqueue_follow_up(
        &self,
        conn: &Connection,
        job: &Job,
        transcript: &str,
    ) -> Result<Option<JobId>> {
        if job.kind != JobKind::Transcribe {
            return Ok(None);
        }
        let Some(submission_id) = job.submission_id.as_deref() else {
            return Ok(None);
        };
        let Some(submission) = submission_repo::find_by_id(conn, submission_id)? else {
            return Ok(None);
        };

        let requested =
            job.metadata_flag(AUTO_SUMMARIZE_KEY) || submission.metadata_flag(AUTO_SUMMARIZE_KEY);
        if !requested {
            return Ok(None);
        }
        if submission.status.is_terminal() {
            warn!(
                job.id = job.id,
                submission.id = submission_id,
                status = %submission.status,
                "Submission already terminal; not chaining summarize job"
            );
            return Ok(None);
        }
        if transcript.trim().is_empty() {
            warn!(job.id = job.id, "Empty transcript; not chaining summarize job");
            return Ok(None);
        }

        let provider = job
            .metadata_str(SUMMARIZE_PROVIDER_KEY)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.chain.summarize_provider);
        let follow_up = NewJob::summarize(transcript, provider)
            .for_submission(submission_id)
            .with_metadata(json!({
                AUTO_SUMMARIZE_KEY: true,
                SOURCE_JOB_KEY: job.id,
            }));

        let chained = match JobQueue::enqueue_in(conn, &follow_up) {
            Ok(id) => id,
            Err(e @ (QueueError::InvalidJobSpec(_) | QueueError::SubmissionNotFound(_))) => {
                warn!(
                    job.id = job.id,
                    submission.id = submission_id,
                    error = %e,
                    "Follow-up summarize job rejected; completing without it"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        info!(
            job.id = chained,
            source_job.id = job.id,
            submission.id = submission_id,
            provider,
            "Chained summarize job"
        );
        Ok(Some(chained))
    }
}

/// Calls the backend under `limit`, converting panics and timeouts into
/// errors, and releases it whatever happened.
async fn run_guarded(
    backend: &Backend,
    input: &JobInput,
    limit: Duration,
) -> std::result::Result<BackendOutput, BackendError> {
    let call = async {
        match (backend, input) {
            (Backend::Transcriber(t), JobInput::Media(locator)) => t.transcribe(locator).await,
            (Backend::Summarizer(s), JobInput::Text(text)) => s.summarize(text).await,
            _ => Err(BackendError::Message(format!(
                "{} backend cannot take {} input",
                backend.kind(),
                input.expected_kind()
            ))),
        }
    };

    let result = match tokio::time::timeout(limit, AssertUnwindSafe(call).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(BackendError::from_panic(panic)),
        Err(_) => Err(BackendError::Timeout(limit)),
    };

    if AssertUnwindSafe(backend.release())
        .catch_unwind()
        .await
        .is_err()
    {
        error!("Backend release panicked");
    } else {
        debug!("Backend released");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Summarizer, Transcriber};
    use crate::db::Database;
    use crate::model::{JobStatus, NewSubmission, SubmissionStatus};
    use crate::tracker::SubmissionTracker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        releases: AtomicUsize,
    }

    #[async_trait]
    impl Transcriber for Counting {
        async fn transcribe(&self, _media: &str) -> std::result::Result<BackendOutput, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(BackendOutput::new("hello world", "fake-whisper"))
        }

        async fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Slow;

    #[async_trait]
    impl Summarizer for Slow {
        async fn summarize(&self, _text: &str) -> std::result::Result<BackendOutput, BackendError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(BackendOutput::new("late", "slow"))
        }
    }

    struct Panicky;

    #[async_trait]
    impl Summarizer for Panicky {
        async fn summarize(&self, _text: &str) -> std::result::Result<BackendOutput, BackendError> {
            panic!("model exploded");
        }
    }

    fn dispatcher(registry: BackendRegistry, timeouts: TimeoutsConfig) -> Dispatcher {
        let queue = JobQueue::new(Database::open_in_memory().unwrap());
        Dispatcher::with_settings(queue, Arc::new(registry), timeouts, ChainConfig::default())
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_without_backend_call() {
        let transcriber = Arc::new(Counting::default());
        let mut registry = BackendRegistry::new();
        registry.register_transcriber("local", transcriber.clone());
        let dispatcher = dispatcher(registry, TimeoutsConfig::default());

        let queue = dispatcher.queue();
        queue
            .enqueue(NewJob::transcribe("/uploads/a.wav", "nonexistent"))
            .unwrap();
        let job = queue.claim_next().unwrap().unwrap();

        let outcome = dispatcher.dispatch(&job).await.unwrap();
        assert!(matches!(
            outcome,
            TerminalOutcome::Failed {
                failure: JobFailure::UnknownProvider { .. },
                ..
            }
        ));
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);
        assert_eq!(transcriber.releases.load(Ordering::SeqCst), 0);

        let stored = queue.get_job(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("Unknown provider 'nonexistent' for transcribe jobs")
        );
    }

    #[tokio::test]
    async fn test_success_records_output_and_releases() {
        let transcriber = Arc::new(Counting::default());
        let mut registry = BackendRegistry::new();
        registry.register_transcriber("local", transcriber.clone());
        let dispatcher = dispatcher(registry, TimeoutsConfig::default());

        let queue = dispatcher.queue();
        queue.enqueue(NewJob::transcribe("/uploads/a.wav", "local")).unwrap();
        let job = queue.claim_next().unwrap().unwrap();

        let outcome = dispatcher.dispatch(&job).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(transcriber.releases.load(Ordering::SeqCst), 1);

        let stored = queue.get_job(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.output_text.as_deref(), Some("hello world"));
        assert_eq!(stored.model_used.as_deref(), Some("fake-whisper"));
        assert!(stored.processing_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let mut registry = BackendRegistry::new();
        registry.register_summarizer("local", Arc::new(Slow));
        let timeouts = TimeoutsConfig {
            transcribe_secs: 600,
            summarize_secs: 0,
        };
        let dispatcher = dispatcher(registry, timeouts);

        let queue = dispatcher.queue();
        queue.enqueue(NewJob::summarize("text", "local")).unwrap();
        let job = queue.claim_next().unwrap().unwrap();

        let outcome = dispatcher.dispatch(&job).await.unwrap();
        assert!(matches!(
            outcome,
            TerminalOutcome::Failed {
                failure: JobFailure::Backend(BackendError::Timeout(_)),
                ..
            }
        ));
        let stored = queue.get_job(job.id).unwrap().unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("timed out after 0s"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let mut registry = BackendRegistry::new();
        registry.register_summarizer("local", Arc::new(Panicky));
        let dispatcher = dispatcher(registry, TimeoutsConfig::default());

        let queue = dispatcher.queue();
        queue.enqueue(NewJob::summarize("text", "local")).unwrap();
        let job = queue.claim_next().unwrap().unwrap();

        let outcome = dispatcher.dispatch(&job).await.unwrap();
        assert!(!outcome.is_completed());
        let stored = queue.get_job(job.id).unwrap().unwrap();
        assert_eq!(
            stored.error_message.as_deref(),
            Some("backend panicked: model exploded")
        );
    }

    #[tokio::test]
    async fn test_chaining_uses_submission_metadata_and_provider_override() {
        let mut registry = BackendRegistry::new();
        registry.register_transcriber("local", Arc::new(Counting::default()));
        let dispatcher = dispatcher(registry, TimeoutsConfig::default());
        let queue = dispatcher.queue();

        let tracker = SubmissionTracker::new(queue.database().clone());
        let mut submission = NewSubmission::new("sub-1", "/uploads/a.wav");
        submission.metadata = Some(json!({"autoSummarize": true}));
        tracker.create_submission(&submission).unwrap();

        queue
            .enqueue(
                NewJob::transcribe("/uploads/a.wav", "local")
                    .for_submission("sub-1")
                    .with_metadata(json!({"summarizeProvider": "remote"})),
            )
            .unwrap();
        let job = queue.claim_next().unwrap().unwrap();

        let outcome = dispatcher.dispatch(&job).await.unwrap();
        let TerminalOutcome::Completed {
            chained_job: Some(chained),
            ..
        } = outcome
        else {
            panic!("expected a chained job, got {outcome:?}");
        };

        let follow_up = queue.get_job(chained).unwrap().unwrap();
        assert_eq!(follow_up.provider, "remote");
        assert_eq!(follow_up.metadata_str(SUMMARIZE_PROVIDER_KEY), None);
        assert_eq!(follow_up.metadata.as_ref().unwrap()[SOURCE_JOB_KEY], json!(job.id));

        let sub = tracker.get_submission("sub-1").unwrap().unwrap();
        assert_eq!(sub.status, SubmissionStatus::Summarizing);
    }

    #[tokio::test]
    async fn test_no_chaining_without_flag() {
        let mut registry = BackendRegistry::new();
        registry.register_transcriber("local", Arc::new(Counting::default()));
        let dispatcher = dispatcher(registry, TimeoutsConfig::default());
        let queue = dispatcher.queue();

        let tracker = SubmissionTracker::new(queue.database().clone());
        tracker
            .create_submission(&NewSubmission::new("sub-1", "/uploads/a.wav"))
            .unwrap();
        queue
            .enqueue(NewJob::transcribe("/uploads/a.wav", "local").for_submission("sub-1"))
            .unwrap();
        let job = queue.claim_next().unwrap().unwrap();

        let outcome = dispatcher.dispatch(&job).await.unwrap();
        assert!(matches!(
            outcome,
            TerminalOutcome::Completed {
                chained_job: None,
                ..
            }
        ));
        assert_eq!(queue.status_snapshot().unwrap().total_jobs, 1);
    }

    fn bound_transcribe(queue: &JobQueue, metadata: serde_json::Value) -> Job {
        let tracker = SubmissionTracker::new(queue.database().clone());
        tracker
            .create_submission(&NewSubmission::new("sub-1", "/uploads/a.wav"))
            .unwrap();
        queue
            .enqueue(
                NewJob::transcribe("/uploads/a.wav", "local")
                    .for_submission("sub-1")
                    .with_metadata(metadata),
            )
            .unwrap();
        queue.claim_next().unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_blank_summarize_provider_falls_back_to_config() {
        let mut registry = BackendRegistry::new();
        registry.register_transcriber("local", Arc::new(Counting::default()));
        let dispatcher = dispatcher(registry, TimeoutsConfig::default());
        let queue = dispatcher.queue();
        let job = bound_transcribe(queue, json!({"autoSummarize": true, "summarizeProvider": "  "}));

        let outcome = dispatcher.dispatch(&job).await.unwrap();
        let TerminalOutcome::Completed {
            chained_job: Some(chained),
            ..
        } = outcome
        else {
            panic!("expected a chained job, got {outcome:?}");
        };
        assert_eq!(queue.get_job(chained).unwrap().unwrap().provider, "local");
        assert_eq!(queue.get_job(job.id).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_rejected_follow_up_still_completes_job() {
        let mut registry = BackendRegistry::new();
        registry.register_transcriber("local", Arc::new(Counting::default()));
        let queue = JobQueue::new(Database::open_in_memory().unwrap());
        let chain = ChainConfig {
            summarize_provider: String::new(),
        };
        let dispatcher =
            Dispatcher::with_settings(queue, Arc::new(registry), TimeoutsConfig::default(), chain);
        let queue = dispatcher.queue();
        let job = bound_transcribe(queue, json!({"autoSummarize": true}));

        let outcome = dispatcher.dispatch(&job).await.unwrap();
        assert!(matches!(
            outcome,
            TerminalOutcome::Completed {
                chained_job: None,
                ..
            }
        ));

        let stored = queue.get_job(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(queue.status_snapshot().unwrap().total_jobs, 1);

        let tracker = SubmissionTracker::new(queue.database().clone());
        let sub = tracker.get_submission("sub-1").unwrap().unwrap();
        assert_eq!(sub.status, SubmissionStatus::Summarizing);
        assert_eq!(sub.transcript.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn test_no_chaining_into_failed_submission() {
        let mut registry = BackendRegistry::new();
        registry.register_transcriber("local", Arc::new(Counting::default()));
        let dispatcher = dispatcher(registry, TimeoutsConfig::default());
        let queue = dispatcher.queue();
        let transcribe = bound_transcribe(queue, json!({"autoSummarize": true}));

        queue
            .enqueue(NewJob::summarize("notes", "local").for_submission("sub-1"))
            .unwrap();
        let summarize = queue.claim_next().unwrap().unwrap();
        queue.mark_failed(summarize.id, "model offline").unwrap();

        let outcome = dispatcher.dispatch(&transcribe).await.unwrap();
        assert!(matches!(
            outcome,
            TerminalOutcome::Completed {
                chained_job: None,
                ..
            }
        ));
        assert_eq!(queue.status_snapshot().unwrap().total_jobs, 2);

        let tracker = SubmissionTracker::new(queue.database().clone());
        let sub = tracker.get_submission("sub-1").unwrap().unwrap();
        assert_eq!(sub.status, SubmissionStatus::Failed);
        assert_eq!(sub.error_message.as_deref(), Some("model offline"));
        assert_eq!(sub.transcript.as_deref(), Some("hello world"));
    }
}
