//! Job repository: row-level operations on the `jobs` table.
//!
//! Every function takes a `&Connection` so callers can compose several of
//! them inside one transaction. `Transaction` derefs to `Connection`.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::DatabaseError;
use crate::model::{Job, JobId, JobInput, JobStatus, NewJob};

const JOB_COLUMNS: &str = "id, job_type, status, provider, input_file_path, input_text, \
     output_text, error_message, submission_id, metadata, created_at, started_at, \
     completed_at, processing_time_ms, model_used";

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    let media: Option<String> = row.get(4)?;
    let text: Option<String> = row.get(5)?;
    let input = match (media, text) {
        (Some(path), None) => JobInput::Media(path),
        (None, Some(text)) => JobInput::Text(text),
        _ => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Null,
                "job must carry exactly one of input_file_path or input_text".into(),
            ))
        }
    };

    Ok(Job {
        id: row.get(0)?,
        kind: row.get(1)?,
        status: row.get(2)?,
        provider: row.get(3)?,
        input,
        output_text: row.get(6)?,
        error_message: row.get(7)?,
        submission_id: row.get(8)?,
        metadata: parse_metadata(row, 9)?,
        created_at: row.get(10)?,
        started_at: row.get(11)?,
        completed_at: row.get(12)?,
        processing_time_ms: row.get(13)?,
        model_used: row.get(14)?,
    })
}

/// Decodes a JSON metadata column.
pub(crate) fn parse_metadata(row: &Row<'_>, idx: usize) -> Result<Option<Value>, rusqlite::Error> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Encodes a metadata payload for storage.
pub(crate) fn encode_metadata(metadata: Option<&Value>) -> Result<Option<String>, DatabaseError> {
    metadata
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::Sqlite(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))
}

/// Inserts a new `pending` job and returns its identifier.
pub fn insert(
    conn: &Connection,
    job: &NewJob,
    created_at: DateTime<Utc>,
) -> Result<JobId, DatabaseError> {
    let metadata = encode_metadata(job.metadata.as_ref())?;
    conn.execute(
        "INSERT INTO jobs (job_type, status, provider, input_file_path, input_text,
         submission_id, metadata, created_at)
         VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            job.kind,
            job.provider,
            job.input.media_locator(),
            job.input.text(),
            job.submission_id,
            metadata,
            created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Atomically moves the oldest `pending` job to `processing` and returns it.
///
/// The select and the update are one statement, so two connections can
/// never both receive the same row.
pub fn claim_next(conn: &Connection, started_at: DateTime<Utc>) -> Result<Option<Job>, DatabaseError> {
    let sql = format!(
        "UPDATE jobs
         SET status = 'processing', started_at = ?1
         WHERE id = (
             SELECT id FROM jobs
             WHERE status = 'pending'
             ORDER BY created_at ASC, id ASC
             LIMIT 1
         )
         AND status = 'pending'
         RETURNING {JOB_COLUMNS}"
    );
    let job = conn
        .query_row(&sql, params![started_at], job_from_row)
        .optional()?;
    Ok(job)
}

/// Sets the completed terminal fields. Returns the number of rows changed,
/// which is zero unless the job exists and is `processing`.
pub fn complete(
    conn: &Connection,
    id: JobId,
    output_text: &str,
    model_used: &str,
    processing_time_ms: i64,
    completed_at: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs
         SET status = 'completed', output_text = ?2, model_used = ?3,
             processing_time_ms = ?4, completed_at = ?5
         WHERE id = ?1 AND status = 'processing'",
        params![id, output_text, model_used, processing_time_ms, completed_at],
    )?;
    Ok(changed)
}

/// Sets the failed terminal fields. Same precondition as [`complete`].
pub fn fail(
    conn: &Connection,
    id: JobId,
    error_message: &str,
    completed_at: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs
         SET status = 'failed', error_message = ?2, completed_at = ?3
         WHERE id = ?1 AND status = 'processing'",
        params![id, error_message, completed_at],
    )?;
    Ok(changed)
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: JobId) -> Result<Option<Job>, DatabaseError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
    let job = conn.query_row(&sql, params![id], job_from_row).optional()?;
    Ok(job)
}

/// Returns only the status of a job, if it exists.
pub fn status_of(conn: &Connection, id: JobId) -> Result<Option<JobStatus>, DatabaseError> {
    let status = conn
        .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    Ok(status)
}

/// Lists a submission's jobs in creation order.
pub fn list_for_submission(conn: &Connection, submission_id: &str) -> Result<Vec<Job>, DatabaseError> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE submission_id = ?1 ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt
        .query_map(params![submission_id], job_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// Lists jobs that have been `processing` since before `cutoff`.
pub fn list_stale_processing(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM jobs
         WHERE status = 'processing' AND started_at < ?1
         ORDER BY started_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt
        .query_map(params![cutoff], job_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}
