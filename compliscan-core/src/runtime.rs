//! Long-lived executor workers fed from a [`JobQueue`].

use std::{fmt, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::executor::{ExecutionOutcome, ScanExecutor};
use crate::queue::JobQueue;
use crate::store::JobStore;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const RECOVERY_BATCH: usize = 1_000;
const DEFERRED_REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// Fixed set of workers, each looping `queue.next()` -> `executor.execute()`.
///
/// Request handlers only enqueue; scan steps never run on the request path.
pub struct WorkerPool {
    shutdown: CancellationToken,
    queue: Arc<dyn JobQueue>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn spawn(
        executor: Arc<ScanExecutor>,
        queue: Arc<dyn JobQueue>,
        workers: usize,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let workers = workers.max(1);
        let mut handles = Vec::with_capacity(workers);

        for i in 0..workers {
            let worker_id = format!("scan-w{i}");
            let executor = Arc::clone(&executor);
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                debug!(worker = %worker_id, "worker started");
                loop {
                    let queued = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = queue.next() => match next {
                            Some(queued) => queued,
                            None => break,
                        },
                    };

                    match executor.execute(queued).await {
                        ExecutionOutcome::Skipped => {
                            debug!(worker = %worker_id, job_id = %queued.job_id, "job skipped");
                        }
                        ExecutionOutcome::Deferred { error } => {
                            warn!(worker = %worker_id, job_id = %queued.job_id, %error, "claim deferred; re-enqueueing");
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(DEFERRED_REQUEUE_DELAY) => {}
                            }
                            if let Err(err) = queue.enqueue(queued).await {
                                warn!(worker = %worker_id, job_id = %queued.job_id, error = %err, "failed to re-enqueue deferred job");
                            }
                        }
                        outcome => {
                            debug!(worker = %worker_id, job_id = %queued.job_id, ?outcome, "job finished");
                        }
                    }
                }
                info!(worker = %worker_id, "worker shutting down");
            }));
        }

        info!(workers, "scan worker pool started");
        Self {
            shutdown,
            queue,
            handles: Mutex::new(handles),
        }
    }

    /// Stop taking new jobs and wait for in-flight ones, up to a grace period
    /// per worker.
    pub async fn shutdown(&self) {
        info!("shutting down scan worker pool");
        self.shutdown.cancel();
        self.queue.close();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = ?err, "worker task failed"),
                Err(_) => warn!("worker task timed out during shutdown"),
            }
        }
        info!("scan worker pool stopped");
    }
}

/// Re-enqueue every job still `pending`, oldest first.
///
/// Run once at startup so jobs created before a restart are not stranded.
/// Returns how many were enqueued.
pub async fn recover_pending(
    store: &dyn JobStore,
    queue: &dyn JobQueue,
) -> Result<usize> {
    let pending = store.pending(RECOVERY_BATCH).await?;
    let count = pending.len();
    for queued in pending {
        queue.enqueue(queued).await?;
    }
    if count > 0 {
        info!(count, "re-enqueued pending scans");
    }
    Ok(count)
}
