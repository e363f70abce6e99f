//! File-backed store in a temp directory, wired to scripted backends.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use mediaq::config::{ChainConfig, TimeoutsConfig};
use mediaq::{
    BackendRegistry, Database, Dispatcher, Job, JobQueue, NewSubmission, Submission,
    SubmissionTracker, WorkerSettings,
};

pub struct TestHarness {
    /// Keeps the directory alive for the harness lifetime.
    _temp_dir: TempDir,
    pub db_path: PathBuf,
    pub db: Database,
    pub queue: JobQueue,
    pub tracker: SubmissionTracker,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("queue.db");
        let db = Database::open(&db_path).expect("Failed to open database");

        Self {
            _temp_dir: temp_dir,
            queue: JobQueue::new(db.clone()),
            tracker: SubmissionTracker::new(db.clone()),
            db_path,
            db,
        }
    }

    /// A second, independent connection to the same file, as another
    /// worker process would have.
    pub fn open_another(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to reopen database")
    }

    pub fn dispatcher(&self, registry: BackendRegistry) -> Dispatcher {
        self.dispatcher_with_timeouts(registry, TimeoutsConfig::default())
    }

    pub fn dispatcher_with_timeouts(
        &self,
        registry: BackendRegistry,
        timeouts: TimeoutsConfig,
    ) -> Dispatcher {
        Dispatcher::with_settings(
            self.queue.clone(),
            Arc::new(registry),
            timeouts,
            ChainConfig::default(),
        )
    }

    pub fn submission(&self, id: &str) -> Submission {
        self.tracker
            .get_submission(id)
            .expect("store error")
            .unwrap_or_else(|| panic!("submission {id} missing"))
    }

    pub fn create_submission(&self, id: &str, metadata: Option<serde_json::Value>) {
        let mut submission = NewSubmission::new(id, format!("/uploads/{id}.wav"));
        submission.metadata = metadata;
        self.tracker
            .create_submission(&submission)
            .expect("Failed to create submission");
    }

    pub fn claim(&self) -> Job {
        self.queue
            .claim_next()
            .expect("store error")
            .expect("expected a pending job")
    }
}

pub fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(10),
        pacing_delay: Duration::ZERO,
        error_cooldown: Duration::from_millis(10),
        exit_when_empty: false,
    }
}
