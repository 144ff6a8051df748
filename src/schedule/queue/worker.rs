use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Counters;
use crate::schedule::processors::{JobOutcome, JobProcessor};

pub(super) struct QueueWorker {
    // worker index, only used in logs
    id: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    processor: Arc<dyn JobProcessor>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl QueueWorker {
    pub(super) fn new(
        id: usize,
        receiver: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
        processor: Arc<dyn JobProcessor>,
        counters: Arc<Counters>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            receiver,
            processor,
            counters,
            cancel,
        }
    }

    async fn next_job(&self) -> Option<String> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            job_id = async { self.receiver.lock().await.recv().await } => job_id,
        }
    }

    pub(super) async fn run(self) {
        info!("Worker {} started", self.id);
        while let Some(job_id) = self.next_job().await {
            self.counters.dequeued.fetch_add(1, Ordering::SeqCst);
            self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
            debug!("Worker {} picked up job {}", self.id, job_id);

            // panics count as failures
            let result = AssertUnwindSafe(self.processor.process_job(&job_id))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(JobOutcome::Completed)) => {
                    self.counters.processed.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Ok(JobOutcome::Skipped)) => {
                    self.counters.skipped.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Err(e)) => {
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                    error!("Worker {} failed job {}: {}", self.id, job_id, e);
                }
                Err(_) => {
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                    warn!("Worker {} recovered from a panic while processing job {}", self.id, job_id);
                }
            }
            self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        info!("Worker {} stopped", self.id);
    }
}
