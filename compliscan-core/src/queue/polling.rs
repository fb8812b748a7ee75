use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::JobQueue;
use crate::error::{Result, ScanError};
use crate::store::JobStore;
use crate::types::QueuedJob;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_FETCH_LIMIT: usize = 32;

#[derive(Clone, Debug)]
pub struct PollingJobQueueConfig {
    pub poll_interval: Duration,
    pub fetch_limit: usize,
}

impl Default for PollingJobQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            fetch_limit: DEFAULT_FETCH_LIMIT,
        }
    }
}

/// Queue whose entries are the `pending` records of a [`JobStore`].
///
/// Enqueue only wakes a poller; the record written by `create` or `retry` is
/// already the queue entry, so a job can never exist without being queued.
/// Several processes may hand out the same job; the claim decides who runs it.
pub struct PollingJobQueue {
    store: Arc<dyn JobStore>,
    config: PollingJobQueueConfig,
    buffer: Mutex<VecDeque<QueuedJob>>,
    wake: Notify,
    closed: CancellationToken,
}

impl PollingJobQueue {
    pub fn new(store: Arc<dyn JobStore>, config: PollingJobQueueConfig) -> Self {
        Self {
            store,
            config,
            buffer: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            closed: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for PollingJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingJobQueue")
            .field("config", &self.config)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl JobQueue for PollingJobQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ScanError::storage("job queue is closed"));
        }
        trace!(job_id = %job.job_id, "waking pending-job poller");
        self.wake.notify_one();
        Ok(())
    }

    async fn next(&self) -> Option<QueuedJob> {
        loop {
            if self.closed.is_cancelled() {
                return None;
            }

            {
                let mut buffer = self.buffer.lock().await;
                if let Some(job) = buffer.pop_front() {
                    return Some(job);
                }

                match self.store.pending(self.config.fetch_limit).await {
                    Ok(jobs) if !jobs.is_empty() => {
                        buffer.extend(jobs);
                        continue;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "failed to poll pending scan jobs");
                    }
                }
            }

            tokio::select! {
                _ = self.closed.cancelled() => return None,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    fn close(&self) {
        self.closed.cancel();
        self.wake.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;
    use crate::types::TenantId;
    use uuid::Uuid;

    #[tokio::test]
    async fn hands_out_pending_records_and_stops_on_close() {
        let store = Arc::new(MemoryJobStore::new());
        let tenant = TenantId(Uuid::from_u128(5));
        let job = store.create(tenant, "example.com").await.unwrap();

        let queue = PollingJobQueue::new(
            store.clone(),
            PollingJobQueueConfig {
                poll_interval: Duration::from_millis(10),
                fetch_limit: 4,
            },
        );
        queue.enqueue(job.queued()).await.unwrap();

        assert_eq!(queue.next().await, Some(job.queued()));

        queue.close();
        assert_eq!(queue.next().await, None);
    }
}
