mod worker;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::schedule::processors::JobProcessor;
use worker::QueueWorker;

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub workers: usize,
    /// How long `stop` waits for in-flight jobs.
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task queue is not running")]
    NotRunning,
    #[error("task queue is already running")]
    AlreadyRunning,
    #[error("task queue channel is closed")]
    Closed,
}

#[derive(Default)]
pub(crate) struct Counters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    in_flight: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub running: bool,
    pub workers: usize,
    pub queued: u64,
    pub in_flight: usize,
    pub enqueued: u64,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub finished: usize,
    pub timed_out: usize,
}

/// FIFO of job ids drained by a fixed pool of workers.
pub struct TaskQueue {
    config: QueueConfig,
    processor: Arc<dyn JobProcessor>,
    sender: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl TaskQueue {
    pub fn new(config: QueueConfig, processor: Arc<dyn JobProcessor>) -> Self {
        Self {
            config,
            processor,
            sender: StdMutex::new(None),
            workers: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
            cancel: CancellationToken::new(),
        }
    }

    fn sender(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.sender().is_some()
    }

    /// Spawns the workers. A stopped queue cannot be started again.
    pub async fn start(&self) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::NotRunning);
        }
        let mut workers = self.workers.lock().await;
        let receiver = {
            let mut sender = self.sender();
            if sender.is_some() {
                return Err(QueueError::AlreadyRunning);
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *sender = Some(tx);
            Arc::new(Mutex::new(rx))
        };

        let count = self.config.workers.max(1);
        for id in 0..count {
            let worker = QueueWorker::new(
                id,
                receiver.clone(),
                self.processor.clone(),
                self.counters.clone(),
                self.cancel.child_token(),
            );
            workers.push(tokio::spawn(worker.run()));
        }
        info!("Task queue started with {} workers", count);
        Ok(())
    }

    /// Returns as soon as the id is queued.
    pub fn enqueue_job(&self, job_id: &str) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::NotRunning);
        }
        let sender = self.sender();
        let tx = sender.as_ref().ok_or(QueueError::NotRunning)?;
        tx.send(job_id.to_string()).map_err(|_| QueueError::Closed)?;
        self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Stops taking jobs, lets in-flight jobs finish and waits up to the shutdown timeout.
    /// Ids still queued are dropped; their jobs stay `Pending` in the repository.
    pub async fn stop(&self) -> StopReport {
        self.cancel.cancel();
        self.sender().take();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        let mut report = StopReport::default();
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => report.finished += 1,
                Err(_) => {
                    report.timed_out += 1;
                    handle.abort();
                }
            }
        }

        if report.timed_out > 0 {
            warn!(
                "{} workers did not finish within {:?} and were aborted",
                report.timed_out, self.config.shutdown_timeout
            );
        }
        info!("Task queue stopped");
        report
    }

    pub fn stats(&self) -> QueueStats {
        let enqueued = self.counters.enqueued.load(Ordering::SeqCst);
        let dequeued = self.counters.dequeued.load(Ordering::SeqCst);
        QueueStats {
            running: self.is_running(),
            workers: self.config.workers.max(1),
            queued: enqueued.saturating_sub(dequeued),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            enqueued,
            processed: self.counters.processed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            skipped: self.counters.skipped.load(Ordering::SeqCst),
        }
    }
}
