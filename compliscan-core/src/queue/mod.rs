//! Hand-off between the request path and the executor workers.

pub mod memory;
pub mod polling;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::QueuedJob;

pub use memory::MemoryJobQueue;
pub use polling::{PollingJobQueue, PollingJobQueueConfig};

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: QueuedJob) -> Result<()>;

    /// Wait for the next job. `None` once the queue has been closed and drained.
    async fn next(&self) -> Option<QueuedJob>;

    /// Stop accepting work and wake every waiting consumer.
    fn close(&self);
}
