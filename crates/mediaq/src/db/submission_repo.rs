//! Submission repository: row-level operations on the `submissions` table.
//!
//! Status changes only touch non-terminal rows. Transcript and summary text
//! is always stored, so a late result is never lost.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::job_repo::{encode_metadata, parse_metadata};
use super::DatabaseError;
use crate::model::{JobId, NewSubmission, Submission, SubmissionStatus};

const SUBMISSION_COLUMNS: &str = "id, file_path, original_filename, mime_type, file_size, \
     duration_seconds, transcript, transcript_job_id, transcribed_at, summary, summary_job_id, \
     summarized_at, status, error_message, metadata, created_at, updated_at";

fn submission_from_row(row: &Row<'_>) -> Result<Submission, rusqlite::Error> {
    Ok(Submission {
        id: row.get(0)?,
        file_path: row.get(1)?,
        original_filename: row.get(2)?,
        mime_type: row.get(3)?,
        file_size: row.get(4)?,
        duration_seconds: row.get(5)?,
        transcript: row.get(6)?,
        transcript_job_id: row.get(7)?,
        transcribed_at: row.get(8)?,
        summary: row.get(9)?,
        summary_job_id: row.get(10)?,
        summarized_at: row.get(11)?,
        status: row.get(12)?,
        error_message: row.get(13)?,
        metadata: parse_metadata(row, 14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

/// Inserts a new `pending` submission.
pub fn insert(
    conn: &Connection,
    submission: &NewSubmission,
    created_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let metadata = encode_metadata(submission.metadata.as_ref())?;
    conn.execute(
        "INSERT INTO submissions (id, file_path, original_filename, mime_type, file_size,
         duration_seconds, status, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?8)",
        params![
            submission.id,
            submission.file_path,
            submission.original_filename,
            submission.resolved_mime_type(),
            submission.file_size,
            submission.duration_seconds,
            metadata,
            created_at,
        ],
    )?;
    Ok(())
}

/// Finds a submission by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Submission>, DatabaseError> {
    let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?1");
    let found = conn
        .query_row(&sql, params![id], submission_from_row)
        .optional()?;
    Ok(found)
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM submissions WHERE id = ?1)",
        params![id],
        |r| r.get(0),
    )?;
    Ok(exists)
}

/// Moves a non-terminal submission to `status`.
pub fn update_status(
    conn: &Connection,
    id: &str,
    status: SubmissionStatus,
    updated_at: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE submissions SET status = ?2, updated_at = ?3
         WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
        params![id, status, updated_at],
    )?;
    Ok(changed)
}

/// Stores a transcript and moves a non-terminal submission to
/// `summarizing`. The text is kept even when the submission is already
/// terminal. Returns the resulting status, or `None` if the row is missing.
pub fn record_transcript(
    conn: &Connection,
    id: &str,
    transcript: &str,
    job_id: JobId,
    at: DateTime<Utc>,
) -> Result<Option<SubmissionStatus>, DatabaseError> {
    let status = conn
        .query_row(
            "UPDATE submissions
             SET transcript = ?2, transcript_job_id = ?3, transcribed_at = ?4,
                 status = CASE WHEN status IN ('completed', 'failed') THEN status
                          ELSE 'summarizing' END,
                 updated_at = ?4
             WHERE id = ?1
             RETURNING status",
            params![id, transcript, job_id, at],
            |r| r.get(0),
        )
        .optional()?;
    Ok(status)
}

/// Stores a summary and moves a non-terminal submission to `completed`.
/// Same terminal rule and return value as [`record_transcript`].
pub fn record_summary(
    conn: &Connection,
    id: &str,
    summary: &str,
    job_id: JobId,
    at: DateTime<Utc>,
) -> Result<Option<SubmissionStatus>, DatabaseError> {
    let status = conn
        .query_row(
            "UPDATE submissions
             SET summary = ?2, summary_job_id = ?3, summarized_at = ?4,
                 status = CASE WHEN status IN ('completed', 'failed') THEN status
                          ELSE 'completed' END,
                 updated_at = ?4
             WHERE id = ?1
             RETURNING status",
            params![id, summary, job_id, at],
            |r| r.get(0),
        )
        .optional()?;
    Ok(status)
}

/// Moves a non-terminal submission to `failed` with the given error detail.
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    error_message: &str,
    at: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE submissions SET status = 'failed', error_message = ?2, updated_at = ?3
         WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
        params![id, error_message, at],
    )?;
    Ok(changed)
}
