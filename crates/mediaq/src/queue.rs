//! The job queue: enqueue, atomic claim, terminal updates, and reads.
//!
//! All job mutation goes through here. Terminal updates apply the submission
//! tracker's hooks in the same transaction.

use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::db::stats_repo::{self, QueueStatus};
use crate::db::{job_repo, submission_repo, Database};
use crate::error::{QueueError, Result};
use crate::model::{Job, JobId, JobKind, JobStatus, NewJob};
use crate::tracker::SubmissionTracker;

/// Handle to the persisted queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Validates and persists a new `pending` job.
    pub fn enqueue(&self, job: NewJob) -> Result<JobId> {
        validate(&job)?;
        let id = self.db.transaction(|tx| Self::enqueue_in(tx, &job))?;
        info!(
            job.id = id,
            job.kind = %job.kind,
            job.provider = %job.provider,
            "Created job"
        );
        Ok(id)
    }

    /// Enqueues inside a caller-owned transaction.
    pub(crate) fn enqueue_in(conn: &Connection, job: &NewJob) -> Result<JobId> {
        validate(job)?;
        if let Some(submission_id) = job.submission_id.as_deref() {
            if !submission_repo::exists(conn, submission_id)? {
                return Err(QueueError::SubmissionNotFound(submission_id.to_string()));
            }
        }
        Ok(job_repo::insert(conn, job, Utc::now())?)
    }

    /// Claims the oldest pending job, moving it to `processing`.
    ///
    /// Returns `None` without side effects when nothing is pending.
    pub fn claim_next(&self) -> Result<Option<Job>> {
        let claimed = self.db.transaction(|tx| -> Result<Option<Job>> {
            let Some(job) = job_repo::claim_next(tx, Utc::now())? else {
                return Ok(None);
            };
            SubmissionTracker::on_job_started(tx, &job)?;
            Ok(Some(job))
        })?;

        if let Some(job) = &claimed {
            debug!(job.id = job.id, job.kind = %job.kind, "Claimed job");
        }
        Ok(claimed)
    }

    /// Marks a `processing` job completed.
    pub fn mark_completed(
        &self,
        job_id: JobId,
        output_text: &str,
        backend_name: &str,
        duration_ms: i64,
    ) -> Result<()> {
        self.complete_then(job_id, output_text, backend_name, duration_ms, |_, _| Ok(()))
    }

    /// Marks a `processing` job completed, then runs `then` in the same
    /// transaction after the submission has been updated.
    pub fn complete_then<T, F>(
        &self,
        job_id: JobId,
        output_text: &str,
        backend_name: &str,
        duration_ms: i64,
        then: F,
    ) -> Result<T>
    where
        F: FnOnce(&Connection, &Job) -> Result<T>,
    {
        let value = self.db.transaction(|tx| -> Result<T> {
            let job = processing_job(tx, job_id, JobStatus::Completed)?;
            let changed = job_repo::complete(
                tx,
                job_id,
                output_text,
                backend_name,
                duration_ms.max(0),
                Utc::now(),
            )?;
            ensure_changed(changed, job_id, JobStatus::Completed)?;
            SubmissionTracker::on_job_completed(tx, &job, output_text)?;
            then(tx, &job)
        })?;

        info!(job.id = job_id, duration_ms, backend = backend_name, "Job completed");
        Ok(value)
    }

    /// Marks a `processing` job failed.
    pub fn mark_failed(&self, job_id: JobId, error_detail: &str) -> Result<()> {
        self.db.transaction(|tx| fail_in(tx, job_id, error_detail))?;
        warn!(job.id = job_id, error = error_detail, "Job failed");
        Ok(())
    }

    pub fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.db.with_conn(|conn| Ok(job_repo::find_by_id(conn, job_id)?))
    }

    pub fn jobs_for_submission(&self, submission_id: &str) -> Result<Vec<Job>> {
        self.db
            .with_conn(|conn| Ok(job_repo::list_for_submission(conn, submission_id)?))
    }

    /// Counts per status plus the average duration of completed jobs.
    pub fn status_snapshot(&self) -> Result<QueueStatus> {
        self.db.with_conn(|conn| Ok(stats_repo::queue_status(conn)?))
    }

    /// Fails every job that has been `processing` for longer than
    /// `older_than`, along with its submission. Operator-triggered only;
    /// stale jobs are never requeued.
    pub fn fail_stale_jobs(&self, older_than: Duration) -> Result<Vec<JobId>> {
        let threshold = chrono::Duration::from_std(older_than).map_err(|_| {
            QueueError::InvalidJobSpec(format!("stale threshold too large: {older_than:?}"))
        })?;
        let cutoff = Utc::now() - threshold;

        let failed = self.db.transaction(|tx| -> Result<Vec<JobId>> {
            let stale = job_repo::list_stale_processing(tx, cutoff)?;
            let mut ids = Vec::with_capacity(stale.len());
            for job in stale {
                let since = job
                    .started_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string());
                fail_in(tx, job.id, &format!("stale claim: processing since {since}"))?;
                ids.push(job.id);
            }
            Ok(ids)
        })?;

        for id in &failed {
            warn!(job.id = id, "Failed stale job");
        }
        Ok(failed)
    }
}

fn fail_in(conn: &Connection, job_id: JobId, error_detail: &str) -> Result<()> {
    let job = processing_job(conn, job_id, JobStatus::Failed)?;
    let changed = job_repo::fail(conn, job_id, error_detail, Utc::now())?;
    ensure_changed(changed, job_id, JobStatus::Failed)?;
    SubmissionTracker::on_job_failed(conn, &job, error_detail)
}

/// Loads a job and checks it may move to the terminal status `to`.
fn processing_job(conn: &Connection, job_id: JobId, to: JobStatus) -> Result<Job> {
    let job = job_repo::find_by_id(conn, job_id)?.ok_or(QueueError::JobNotFound(job_id))?;
    if job.status != JobStatus::Processing {
        return Err(QueueError::InvalidStateTransition {
            job_id,
            from: job.status,
            to,
        });
    }
    Ok(job)
}

fn ensure_changed(changed: usize, job_id: JobId, to: JobStatus) -> Result<()> {
    if changed == 1 {
        Ok(())
    } else {
        // Only reachable if the row changed between the read and the write,
        // which the immediate transaction rules out.
        Err(QueueError::InvalidStateTransition {
            job_id,
            from: JobStatus::Processing,
            to,
        })
    }
}

fn validate(job: &NewJob) -> Result<()> {
    if job.provider.trim().is_empty() {
        return Err(QueueError::InvalidJobSpec(
            "provider must not be empty".to_string(),
        ));
    }
    if job.input.expected_kind() != job.kind {
        let message = match job.kind {
            JobKind::Transcribe => "transcribe jobs require a media locator input",
            JobKind::Summarize => "summarize jobs require literal text input",
        };
        return Err(QueueError::InvalidJobSpec(message.to_string()));
    }
    if job.input.as_str().trim().is_empty() {
        return Err(QueueError::InvalidJobSpec(format!(
            "{} job input must not be empty",
            job.kind
        )));
    }
    if let Some(metadata) = &job.metadata {
        if !matches!(metadata, Value::Object(_)) {
            return Err(QueueError::InvalidJobSpec(
                "metadata must be a JSON object".to_string(),
            ));
        }
    }
    if matches!(job.submission_id.as_deref(), Some(id) if id.trim().is_empty()) {
        return Err(QueueError::InvalidJobSpec(
            "submission id must not be empty".to_string(),
        ));
    }
    Ok(())
}
