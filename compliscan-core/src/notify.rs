//! Client-facing view of a job's progress feed.
//!
//! A [`ClientFeed`] opens with a `connected` acknowledgement and a snapshot
//! of the stored record, then relays live frames translated into
//! [`ClientMessage`]s. It ends right after the first terminal message.
//! Dropping it at any point unsubscribes.

use std::{
    collections::VecDeque,
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::debug;

use crate::channel::{ProgressEvent, ProgressSubscriber, Subscription};
use crate::error::Result;
use crate::store::JobStore;
use crate::types::{Grade, JobId, ScanJob, ScanStatus, TenantId};

/// `{type:"connected"}` acknowledgement sent once per connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Connected {
    pub r#type: &'static str,
    pub job_id: JobId,
    pub status: ScanStatus,
    pub progress: u8,
}

/// In-flight, cancelled or failed state. `grade` and `risk_score` stay null
/// until the job completes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub step: Option<String>,
    pub grade: Option<Grade>,
    pub risk_score: Option<f64>,
    pub status: ScanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal success; clients refetch the full record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompleteNotice {
    pub r#type: &'static str,
    pub force_reload: bool,
    pub progress: u8,
    pub grade: Grade,
    pub risk_score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Connected(Connected),
    Update(ProgressUpdate),
    Complete(CompleteNotice),
}

impl ClientMessage {
    pub fn connected(job: &ScanJob) -> Self {
        Self::Connected(Connected {
            r#type: "connected",
            job_id: job.id,
            status: job.status,
            progress: job.progress,
        })
    }

    pub fn complete(grade: Grade, risk_score: f64) -> Self {
        Self::Complete(CompleteNotice {
            r#type: "complete",
            force_reload: true,
            progress: 100,
            grade,
            risk_score,
        })
    }

    /// Current state of a stored record, in the same shapes live events use.
    pub fn snapshot(job: &ScanJob) -> Self {
        if job.status == ScanStatus::Complete
            && let Some(outcome) = &job.outcome
        {
            return Self::complete(outcome.grade, outcome.risk_score);
        }

        let error = (job.status == ScanStatus::Failed)
            .then(|| {
                job.log.iter().rev().find_map(|entry| {
                    entry.message.strip_prefix("[ERROR] ").map(str::to_string)
                })
            })
            .flatten();

        Self::Update(ProgressUpdate {
            progress: job.progress,
            step: job.log.last().map(|entry| entry.message.clone()),
            grade: None,
            risk_score: None,
            status: job.status,
            error,
        })
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Connected(_) => false,
            Self::Update(update) => update.status.is_terminal(),
            Self::Complete(_) => true,
        }
    }
}

impl From<ProgressEvent> for ClientMessage {
    fn from(event: ProgressEvent) -> Self {
        match event {
            ProgressEvent::Progress {
                progress,
                step,
                status,
            } => Self::Update(ProgressUpdate {
                progress,
                step,
                grade: None,
                risk_score: None,
                status,
                error: None,
            }),
            ProgressEvent::Complete {
                grade, risk_score, ..
            } => Self::complete(grade, risk_score),
            ProgressEvent::Failed { progress, error } => {
                Self::Update(ProgressUpdate {
                    progress,
                    step: None,
                    grade: None,
                    risk_score: None,
                    status: ScanStatus::Failed,
                    error: Some(error),
                })
            }
        }
    }
}

/// Stream of [`ClientMessage`]s for one connection.
pub struct ClientFeed {
    job_id: JobId,
    queued: VecDeque<ClientMessage>,
    subscription: Option<Subscription>,
}

impl ClientFeed {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    fn finish(&mut self) {
        if self.subscription.take().is_some() {
            debug!(job_id = %self.job_id, "client feed finished");
        }
    }
}

impl fmt::Debug for ClientFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFeed")
            .field("job_id", &self.job_id)
            .field("queued", &self.queued.len())
            .field("live", &self.subscription.is_some())
            .finish()
    }
}

impl Stream for ClientFeed {
    type Item = ClientMessage;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        if let Some(message) = self.queued.pop_front() {
            return Poll::Ready(Some(message));
        }

        let Some(subscription) = self.subscription.as_mut() else {
            return Poll::Ready(None);
        };

        match subscription.poll_next_unpin(cx) {
            Poll::Ready(Some(frame)) => {
                let message = ClientMessage::from(frame.event);
                if message.is_terminal() {
                    self.finish();
                }
                Poll::Ready(Some(message))
            }
            Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct NotificationGateway {
    store: Arc<dyn JobStore>,
    subscriber: Arc<dyn ProgressSubscriber>,
}

impl fmt::Debug for NotificationGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationGateway").finish_non_exhaustive()
    }
}

impl NotificationGateway {
    pub fn new(
        store: Arc<dyn JobStore>,
        subscriber: Arc<dyn ProgressSubscriber>,
    ) -> Self {
        Self { store, subscriber }
    }

    /// Open a feed for `job_id` on behalf of `tenant_id`.
    ///
    /// Foreign and unknown jobs fail with `NotFound` before any subscription
    /// is made. The snapshot is read after subscribing, so nothing published
    /// in between is lost; clients may see the same progress twice.
    pub async fn connect(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<ClientFeed> {
        self.store.get(tenant_id, job_id).await?;
        let subscription = self.subscriber.subscribe(job_id).await?;
        let job = self.store.get(tenant_id, job_id).await?;

        let snapshot = ClientMessage::snapshot(&job);
        let live = !snapshot.is_terminal();
        debug!(job_id = %job_id, tenant_id = %tenant_id, status = %job.status, "client connected");

        Ok(ClientFeed {
            job_id,
            queued: VecDeque::from([ClientMessage::connected(&job), snapshot]),
            subscription: live.then_some(subscription),
        })
    }
}
