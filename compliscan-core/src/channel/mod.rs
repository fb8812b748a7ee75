//! Per-job progress pub/sub.
//!
//! One topic per [`JobId`]. Publishing is fire-and-forget: receivers that are
//! not subscribed at publish time never see the event, and a slow receiver is
//! skipped ahead rather than allowed to stall the executor. Within a single
//! job the executor is the only writer, so frames on a topic arrive in step
//! order and carry a strictly increasing `sequence`.

pub mod inproc;
#[cfg(feature = "database")]
pub mod pg_notify;

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::{
    BroadcastStream, errors::BroadcastStreamRecvError,
};
use tracing::warn;

use crate::error::Result;
use crate::types::{Grade, JobId, ScanStatus};

pub use inproc::InProcProgressChannel;
#[cfg(feature = "database")]
pub use pg_notify::PgNotifyProgressChannel;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        progress: u8,
        step: Option<String>,
        status: ScanStatus,
    },
    Complete {
        progress: u8,
        grade: Grade,
        risk_score: f64,
    },
    Failed {
        progress: u8,
        error: String,
    },
}

impl ProgressEvent {
    pub fn running(progress: u8, step: impl Into<String>) -> Self {
        Self::Progress {
            progress,
            step: Some(step.into()),
            status: ScanStatus::Running,
        }
    }

    /// No further frames follow a terminal event for the current run.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Progress { status, .. } => status.is_terminal(),
            Self::Complete { .. } | Self::Failed { .. } => true,
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            Self::Progress { progress, .. }
            | Self::Complete { progress, .. }
            | Self::Failed { progress, .. } => *progress,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressFrame {
    pub job_id: JobId,
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    pub event: ProgressEvent,
}

#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    /// Best-effort delivery to the job's current subscribers. Must not block
    /// on slow or absent receivers.
    async fn publish(&self, job_id: JobId, event: ProgressEvent) -> Result<()>;
}

#[async_trait]
pub trait ProgressSubscriber: Send + Sync {
    async fn subscribe(&self, job_id: JobId) -> Result<Subscription>;
}

/// Releases a topic slot when the owning [`Subscription`] is dropped.
pub(crate) trait TopicRelease: Send + Sync {
    fn release(&self, job_id: JobId);
}

/// A live feed of one job's frames.
///
/// Dropping the subscription unsubscribes, on every exit path, including
/// panics and aborted tasks.
pub struct Subscription {
    job_id: JobId,
    frames: BroadcastStream<ProgressFrame>,
    release: Option<Box<dyn TopicRelease>>,
}

impl Subscription {
    pub(crate) fn new(
        job_id: JobId,
        receiver: tokio::sync::broadcast::Receiver<ProgressFrame>,
        release: Box<dyn TopicRelease>,
    ) -> Self {
        Self {
            job_id,
            frames: BroadcastStream::new(receiver),
            release: Some(release),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

impl Stream for Subscription {
    type Item = ProgressFrame;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.frames).poll_next(cx) {
                Poll::Ready(Some(Ok(frame))) => return Poll::Ready(Some(frame)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(
                    skipped,
                )))) => {
                    warn!(
                        job_id = %self.job_id,
                        skipped,
                        "progress subscriber lagged; skipping ahead"
                    );
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            // Swap the live receiver out first so the topic sees zero receivers.
            let (_, closed) = tokio::sync::broadcast::channel(1);
            drop(std::mem::replace(
                &mut self.frames,
                BroadcastStream::new(closed),
            ));
            release.release(self.job_id);
        }
    }
}
