use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

use super::{Shutdown, Worker, WorkerReport, WorkerSettings, WorkerState};
use crate::dispatcher::Dispatcher;
use crate::error::ConfigError;

/// A set of workers sharing one queue handle and one shutdown signal.
pub struct WorkerPool {
    workers: Vec<JoinHandle<WorkerReport>>,
    states: Vec<watch::Receiver<WorkerState>>,
    shutdown: Shutdown,
}

impl WorkerPool {
    /// Spawns `worker_count` workers on the current tokio runtime. A count
    /// of zero is rejected.
    pub fn start(
        dispatcher: Dispatcher,
        settings: WorkerSettings,
        worker_count: usize,
    ) -> Result<Self, ConfigError> {
        Self::with_shutdown(dispatcher, settings, worker_count, Shutdown::new())
    }

    /// Like [`WorkerPool::start`], driven by an existing shutdown signal.
    pub fn with_shutdown(
        dispatcher: Dispatcher,
        settings: WorkerSettings,
        worker_count: usize,
        shutdown: Shutdown,
    ) -> Result<Self, ConfigError> {
        if worker_count == 0 {
            return Err(ConfigError::Validation {
                message: "worker count must be at least 1".to_string(),
            });
        }

        let mut workers = Vec::with_capacity(worker_count);
        let mut states = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let worker = Worker::new(worker_id, dispatcher.clone(), settings.clone(), &shutdown);
            states.push(worker.state());

            let span = info_span!("worker", worker.id = worker_id);
            workers.push(tokio::spawn(worker.run().instrument(span)));
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            workers,
            states,
            shutdown,
        })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Asks every worker to finish its current job and stop.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.trigger();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Current state of each worker, by worker id.
    pub fn states(&self) -> Vec<WorkerState> {
        self.states.iter().map(|rx| *rx.borrow()).collect()
    }

    /// Waits for every worker to stop and sums their reports.
    pub async fn wait(self) -> WorkerReport {
        let mut total = WorkerReport::default();
        for (i, worker) in self.workers.into_iter().enumerate() {
            match worker.await {
                Ok(report) => {
                    debug!("Worker {} finished", i);
                    total.merge(report);
                }
                Err(e) => error!("Worker {} panicked: {}", i, e),
            }
        }

        info!(
            completed = total.completed,
            failed = total.failed,
            "All workers have stopped"
        );
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendOutput, BackendRegistry, Summarizer};
    use crate::config::{ChainConfig, TimeoutsConfig};
    use crate::db::Database;
    use crate::model::NewJob;
    use crate::queue::JobQueue;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl Summarizer for Echo {
        async fn summarize(&self, text: &str) -> Result<BackendOutput, BackendError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(BackendOutput::new(text, "echo"))
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = BackendRegistry::new();
        registry.register_summarizer("local", Arc::new(Echo));
        Dispatcher::with_settings(
            JobQueue::new(Database::open_in_memory().unwrap()),
            Arc::new(registry),
            TimeoutsConfig::default(),
            ChainConfig::default(),
        )
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            pacing_delay: Duration::ZERO,
            error_cooldown: Duration::from_millis(10),
            exit_when_empty: false,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_processes_every_job_once() {
        let dispatcher = dispatcher();
        let queue = dispatcher.queue().clone();
        for i in 0..20 {
            queue
                .enqueue(NewJob::summarize(format!("text {i}"), "local"))
                .unwrap();
        }

        let pool = WorkerPool::start(dispatcher, settings().exit_when_empty(), 4).unwrap();
        assert_eq!(pool.len(), 4);
        let report = pool.wait().await;

        assert_eq!(report.completed, 20);
        assert_eq!(report.failed, 0);
        let status = queue.status_snapshot().unwrap();
        assert_eq!(status.completed, 20);
        assert_eq!(status.pending, 0);
        assert_eq!(status.processing, 0);
    }

    #[tokio::test]
    async fn test_pool_shutdown() {
        let pool = WorkerPool::start(dispatcher(), settings(), 2).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pool.is_shutdown());

        pool.shutdown();
        assert!(pool.is_shutdown());
        let report = tokio::time::timeout(Duration::from_secs(5), pool.wait())
            .await
            .unwrap();
        assert_eq!(report.processed(), 0);
    }

    #[tokio::test]
    async fn test_states_reach_stopped() {
        let pool = WorkerPool::start(dispatcher(), settings().exit_when_empty(), 3).unwrap();
        let mut states: Vec<_> = pool.states.clone();
        pool.wait().await;
        for rx in &mut states {
            assert_eq!(*rx.borrow_and_update(), WorkerState::Stopped);
        }
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let err = WorkerPool::start(dispatcher(), settings(), 0).err().unwrap();
        assert!(matches!(err, ConfigError::Validation { .. }));
        assert!(err.to_string().contains("worker count"));
    }
}
