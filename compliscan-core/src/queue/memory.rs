use async_trait::async_trait;
use std::fmt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::JobQueue;
use crate::error::{Result, ScanError};
use crate::types::QueuedJob;

/// Unbounded in-process FIFO shared by every worker.
pub struct MemoryJobQueue {
    sender: mpsc::UnboundedSender<QueuedJob>,
    receiver: Mutex<mpsc::UnboundedReceiver<QueuedJob>>,
    closed: CancellationToken,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            closed: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for MemoryJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryJobQueue")
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ScanError::storage("job queue is closed"));
        }
        self.sender
            .send(job)
            .map_err(|_| ScanError::storage("job queue receiver dropped"))
    }

    async fn next(&self) -> Option<QueuedJob> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            job = receiver.recv() => job,
            _ = self.closed.cancelled() => receiver.try_recv().ok(),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
