//! Submission tracker.
//!
//! Keeps a submission's status a function of its jobs' outcomes. The queue
//! calls the `on_job_*` hooks inside the same transaction as the job update,
//! so job and submission state never disagree after a crash.

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::db::{submission_repo, Database};
use crate::error::{QueueError, Result};
use crate::model::{Job, JobId, JobKind, NewJob, NewSubmission, Submission, SubmissionStatus};
use crate::queue::JobQueue;

/// Entry point for creating and reading submissions.
#[derive(Debug, Clone)]
pub struct SubmissionTracker {
    db: Database,
}

impl SubmissionTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers an uploaded media item in `pending` status.
    pub fn create_submission(&self, submission: &NewSubmission) -> Result<()> {
        validate(submission)?;
        self.db
            .transaction(|tx| -> Result<()> { insert_new(tx, submission) })?;

        info!(submission.id = %submission.id, "Created submission");
        Ok(())
    }

    /// Registers a submission and enqueues its first job in one transaction.
    /// The job is bound to the new submission.
    pub fn create_with_job(&self, submission: &NewSubmission, job: NewJob) -> Result<JobId> {
        validate(submission)?;
        let job = job.for_submission(submission.id.clone());
        let job_id = self.db.transaction(|tx| -> Result<JobId> {
            insert_new(tx, submission)?;
            JobQueue::enqueue_in(tx, &job)
        })?;

        info!(
            submission.id = %submission.id,
            job.id = job_id,
            job.kind = %job.kind,
            "Created submission with job"
        );
        Ok(job_id)
    }

    pub fn get_submission(&self, id: &str) -> Result<Option<Submission>> {
        self.db.with_conn(|conn| Ok(submission_repo::find_by_id(conn, id)?))
    }

    /// A job bound to a submission was claimed.
    pub(crate) fn on_job_started(conn: &Connection, job: &Job) -> Result<()> {
        let Some(submission_id) = job.submission_id.as_deref() else {
            return Ok(());
        };
        let status = match job.kind {
            JobKind::Transcribe => SubmissionStatus::Transcribing,
            JobKind::Summarize => SubmissionStatus::Summarizing,
        };
        let changed = submission_repo::update_status(conn, submission_id, status, Utc::now())?;
        report(changed, submission_id, job, status);
        Ok(())
    }

    /// A job bound to a submission completed with `output`. The output is
    /// stored even if the submission already reached a terminal state, and
    /// the resulting status is returned.
    pub(crate) fn on_job_completed(
        conn: &Connection,
        job: &Job,
        output: &str,
    ) -> Result<Option<SubmissionStatus>> {
        let Some(submission_id) = job.submission_id.as_deref() else {
            return Ok(None);
        };
        let now = Utc::now();
        let (current, target) = match job.kind {
            JobKind::Transcribe => (
                submission_repo::record_transcript(conn, submission_id, output, job.id, now)?,
                SubmissionStatus::Summarizing,
            ),
            JobKind::Summarize => (
                submission_repo::record_summary(conn, submission_id, output, job.id, now)?,
                SubmissionStatus::Completed,
            ),
        };
        match current {
            Some(status) if status == target => report(1, submission_id, job, status),
            Some(status) => debug!(
                submission.id = submission_id,
                job.id = job.id,
                status = %status,
                "Stored job output; submission already terminal"
            ),
            None => report(0, submission_id, job, target),
        }
        Ok(current)
    }

    /// A job bound to a submission failed. The whole submission fails,
    /// whatever earlier stages produced.
    pub(crate) fn on_job_failed(conn: &Connection, job: &Job, error: &str) -> Result<()> {
        let Some(submission_id) = job.submission_id.as_deref() else {
            return Ok(());
        };
        let changed = submission_repo::mark_failed(conn, submission_id, error, Utc::now())?;
        report(changed, submission_id, job, SubmissionStatus::Failed);
        Ok(())
    }
}

fn validate(submission: &NewSubmission) -> Result<()> {
    if submission.id.trim().is_empty() {
        return Err(QueueError::InvalidJobSpec(
            "submission id must not be empty".to_string(),
        ));
    }
    if submission.file_path.trim().is_empty() {
        return Err(QueueError::InvalidJobSpec(
            "submission file path must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn insert_new(conn: &Connection, submission: &NewSubmission) -> Result<()> {
    if submission_repo::exists(conn, &submission.id)? {
        return Err(QueueError::DuplicateSubmission(submission.id.clone()));
    }
    submission_repo::insert(conn, submission, Utc::now())?;
    Ok(())
}

fn report(changed: usize, submission_id: &str, job: &Job, status: SubmissionStatus) {
    if changed > 0 {
        debug!(
            submission.id = submission_id,
            job.id = job.id,
            status = %status,
            "Submission transitioned"
        );
    } else {
        warn!(
            submission.id = submission_id,
            job.id = job.id,
            status = %status,
            "Submission missing or already terminal; transition skipped"
        );
    }
}
