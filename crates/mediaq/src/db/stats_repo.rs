//! Aggregate queue statistics.

use std::fmt;

use rusqlite::Connection;
use serde::Serialize;

use super::DatabaseError;
use crate::model::JobStatus;

/// Job counts per status plus the mean duration of completed jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub total_jobs: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    /// Rounded average of `processing_time_ms` over completed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_processing_time_ms: Option<i64>,
}

impl QueueStatus {
    pub fn count(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(40);
        writeln!(f, "{rule}")?;
        writeln!(f, "  Media Queue Status")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "  {:<16}{}", "Total jobs:", self.total_jobs)?;
        writeln!(f, "  {:<16}{}", "Pending:", self.pending)?;
        writeln!(f, "  {:<16}{}", "Processing:", self.processing)?;
        writeln!(f, "  {:<16}{}", "Completed:", self.completed)?;
        writeln!(f, "  {:<16}{}", "Failed:", self.failed)?;
        if let Some(avg) = self.avg_processing_time_ms {
            writeln!(f, "  {:<16}{}ms", "Avg time:", avg)?;
        }
        write!(f, "{rule}")
    }
}

/// Reads per-status counts and the completed-job average in one pass.
pub fn queue_status(conn: &Connection) -> Result<QueueStatus, DatabaseError> {
    let mut status = QueueStatus::default();

    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, JobStatus>(0)?, row.get::<_, u64>(1)?))
    })?;
    for row in rows {
        let (job_status, count) = row?;
        match job_status {
            JobStatus::Pending => status.pending = count,
            JobStatus::Processing => status.processing = count,
            JobStatus::Completed => status.completed = count,
            JobStatus::Failed => status.failed = count,
        }
        status.total_jobs += count;
    }

    let avg: Option<f64> = conn.query_row(
        "SELECT AVG(processing_time_ms) FROM jobs
         WHERE status = 'completed' AND processing_time_ms IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    status.avg_processing_time_ms = avg.map(|ms| ms.round() as i64);

    Ok(status)
}
