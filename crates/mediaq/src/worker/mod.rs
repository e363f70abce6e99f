//! Worker loop: claim, dispatch, pace, repeat.
//!
//! Workers share nothing but the store. Each one runs the state machine
//! `Idle -> Running -> Idle`, moving to `Draining` when shutdown is requested
//! and to `Stopped` once its current job is terminal.

pub mod pool;
mod shutdown;

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::dispatcher::{Dispatcher, TerminalOutcome};

pub use pool::WorkerPool;
pub use shutdown::{Shutdown, ShutdownListener};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Loop timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Sleep between claims when the queue is empty.
    pub poll_interval: Duration,
    /// Pause after each finished job before claiming the next one.
    pub pacing_delay: Duration,
    /// Pause after a store error.
    pub error_cooldown: Duration,
    /// Stop instead of sleeping when a claim comes back empty.
    pub exit_when_empty: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            pacing_delay: Duration::from_secs(1),
            error_cooldown: Duration::from_secs(5),
            exit_when_empty: false,
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            pacing_delay: config.pacing_delay(),
            error_cooldown: config.error_cooldown(),
            exit_when_empty: false,
        }
    }

    pub fn exit_when_empty(mut self) -> Self {
        self.exit_when_empty = true;
        self
    }
}

/// What a worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub completed: u64,
    pub failed: u64,
    pub store_errors: u64,
}

impl WorkerReport {
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    fn merge(&mut self, other: WorkerReport) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.store_errors += other.store_errors;
    }

    fn record(&mut self, outcome: &TerminalOutcome) {
        if outcome.is_completed() {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }
}

pub struct Worker {
    id: usize,
    dispatcher: Dispatcher,
    settings: WorkerSettings,
    shutdown: ShutdownListener,
    state: watch::Sender<WorkerState>,
}

impl Worker {
    pub fn new(
        id: usize,
        dispatcher: Dispatcher,
        settings: WorkerSettings,
        shutdown: &Shutdown,
    ) -> Self {
        let (state, _rx) = watch::channel(WorkerState::Idle);
        Self {
            id,
            dispatcher,
            settings,
            shutdown: shutdown.subscribe(),
            state,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Observes state changes.
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            trace!(from = ?previous, to = ?state, "Worker state changed");
        }
    }

    /// Runs until shutdown, or until the queue is empty in
    /// `exit_when_empty` mode.
    pub async fn run(mut self) -> WorkerReport {
        debug!(worker.id = self.id, "Worker started");
        let mut report = WorkerReport::default();

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let claimed = self.dispatcher.queue().claim_next();
            match claimed {
                Ok(Some(job)) => {
                    self.set_state(WorkerState::Running);
                    let result = {
                        let shutdown = &mut self.shutdown;
                        let state = &self.state;
                        let dispatch = self.dispatcher.dispatch(&job);
                        tokio::pin!(dispatch);

                        tokio::select! {
                            result = &mut dispatch => result,
                            _ = shutdown.triggered() => {
                                state.send_replace(WorkerState::Draining);
                                info!(job.id = job.id, "Shutdown requested; finishing current job");
                                dispatch.await
                            }
                        }
                    };

                    match result {
                        Ok(outcome) => report.record(&outcome),
                        Err(e) => {
                            // The job stays `processing`; only a sweep reconciles it.
                            report.store_errors += 1;
                            error!(job.id = job.id, error = %e, "Failed to record job outcome");
                            if self.pause(self.settings.error_cooldown).await {
                                break;
                            }
                            continue;
                        }
                    }

                    if self.shutdown.is_triggered() {
                        break;
                    }
                    self.set_state(WorkerState::Idle);
                    if self.pause(self.settings.pacing_delay).await {
                        break;
                    }
                }
                Ok(None) if self.settings.exit_when_empty => {
                    debug!(worker.id = self.id, "Queue empty; worker exiting");
                    break;
                }
                Ok(None) => {
                    self.set_state(WorkerState::Idle);
                    trace!(
                        "No pending jobs. Polling again in {:?}",
                        self.settings.poll_interval
                    );
                    if self.pause(self.settings.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    report.store_errors += 1;
                    self.set_state(WorkerState::Idle);
                    error!(error = %e, "Failed to claim job");
                    warn!(
                        "Cooling down for {:?} before polling again",
                        self.settings.error_cooldown
                    );
                    if self.pause(self.settings.error_cooldown).await {
                        break;
                    }
                }
            }
        }

        if self.shutdown.is_triggered() {
            self.set_state(WorkerState::Draining);
        }
        self.set_state(WorkerState::Stopped);
        debug!(
            worker.id = self.id,
            completed = report.completed,
            failed = report.failed,
            "Worker stopped"
        );
        report
    }

    /// Sleeps for `duration`. Returns `true` if shutdown was requested.
    async fn pause(&mut self, duration: Duration) -> bool {
        if duration.is_zero() {
            return self.shutdown.is_triggered();
        }
        tokio::select! {
            _ = sleep(duration) => self.shutdown.is_triggered(),
            _ = self.shutdown.triggered() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendOutput, BackendRegistry, Summarizer};
    use crate::config::{ChainConfig, TimeoutsConfig};
    use crate::db::Database;
    use crate::model::{JobStatus, NewJob};
    use crate::queue::JobQueue;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Upper;

    #[async_trait]
    impl Summarizer for Upper {
        async fn summarize(&self, text: &str) -> Result<BackendOutput, BackendError> {
            Ok(BackendOutput::new(text.to_uppercase(), "upper"))
        }
    }

    fn fast_settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            pacing_delay: Duration::ZERO,
            error_cooldown: Duration::from_millis(10),
            exit_when_empty: false,
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = BackendRegistry::new();
        registry.register_summarizer("local", Arc::new(Upper));
        Dispatcher::with_settings(
            JobQueue::new(Database::open_in_memory().unwrap()),
            Arc::new(registry),
            TimeoutsConfig::default(),
            ChainConfig::default(),
        )
    }

    #[test]
    fn test_settings_from_config() {
        let settings = WorkerSettings::from_config(&Config::default());
        assert_eq!(settings, WorkerSettings::default());
        assert!(settings.exit_when_empty().exit_when_empty);
    }

    #[tokio::test]
    async fn test_exit_when_empty_drains_queue() {
        let dispatcher = dispatcher();
        let queue = dispatcher.queue().clone();
        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|t| queue.enqueue(NewJob::summarize(*t, "local")).unwrap())
            .collect();
        queue.enqueue(NewJob::summarize("d", "missing")).unwrap();

        let shutdown = Shutdown::new();
        let worker = Worker::new(0, dispatcher, fast_settings().exit_when_empty(), &shutdown);
        let state = worker.state();
        let report = worker.run().await;

        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(*state.borrow(), WorkerState::Stopped);
        for id in ids {
            let job = queue.get_job(id).unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Completed);
        }
        assert_eq!(queue.status_snapshot().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_worker() {
        let dispatcher = dispatcher();
        let shutdown = Shutdown::new();
        let settings = WorkerSettings {
            poll_interval: Duration::from_secs(60),
            ..fast_settings()
        };
        let worker = Worker::new(0, dispatcher, settings, &shutdown);
        let mut state = worker.state();
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.processed(), 0);
        state
            .wait_for(|s| *s == WorkerState::Stopped)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_start_claims_nothing() {
        let dispatcher = dispatcher();
        let queue = dispatcher.queue().clone();
        queue.enqueue(NewJob::summarize("a", "local")).unwrap();

        let shutdown = Shutdown::new();
        shutdown.trigger();
        let report = Worker::new(0, dispatcher, fast_settings(), &shutdown)
            .run()
            .await;

        assert_eq!(report, WorkerReport::default());
        assert_eq!(queue.status_snapshot().unwrap().pending, 1);
    }
}
