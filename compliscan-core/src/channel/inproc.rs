use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use super::{
    ProgressEvent, ProgressFrame, ProgressPublisher, ProgressSubscriber,
    Subscription, TopicRelease,
};
use crate::error::Result;
use crate::types::JobId;

const DEFAULT_TOPIC_CAPACITY: usize = 64;

#[derive(Debug)]
struct Topic {
    sender: broadcast::Sender<ProgressFrame>,
    sequence: AtomicU64,
}

impl Topic {
    fn new(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }
}

type TopicRegistry = DashMap<JobId, Topic>;

/// In-process topic registry backed by one `broadcast` channel per job.
///
/// Topics exist only while they have subscribers: the first subscribe creates
/// one, the last dropped [`Subscription`] removes it, and publishing to a job
/// nobody watches is a no-op.
#[derive(Clone)]
pub struct InProcProgressChannel {
    topics: Arc<TopicRegistry>,
    capacity: usize,
}

impl Default for InProcProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl InProcProgressChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Fan `event` out to local subscribers of `job_id`.
    pub fn publish_local(
        &self,
        job_id: JobId,
        event: ProgressEvent,
    ) -> Option<ProgressFrame> {
        let Some(topic) = self.topics.get(&job_id) else {
            trace!(job_id = %job_id, "no subscribers for progress event");
            return None;
        };

        let sequence = topic.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = ProgressFrame {
            job_id,
            sequence,
            emitted_at: Utc::now(),
            event,
        };
        let _ = topic.sender.send(frame.clone());
        Some(frame)
    }

    pub fn subscribe_local(&self, job_id: JobId) -> Subscription {
        let receiver = self
            .topics
            .entry(job_id)
            .or_insert_with(|| Topic::new(self.capacity))
            .sender
            .subscribe();

        Subscription::new(
            job_id,
            receiver,
            Box::new(RegistryRelease {
                topics: Arc::clone(&self.topics),
            }),
        )
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.topics
            .get(&job_id)
            .map(|topic| topic.sender.receiver_count())
            .unwrap_or(0)
    }
}

impl fmt::Debug for InProcProgressChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcProgressChannel")
            .field("topics", &self.topics.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

struct RegistryRelease {
    topics: Arc<TopicRegistry>,
}

impl TopicRelease for RegistryRelease {
    fn release(&self, job_id: JobId) {
        let removed = self
            .topics
            .remove_if(&job_id, |_, topic| topic.sender.receiver_count() == 0);
        if removed.is_some() {
            trace!(job_id = %job_id, "progress topic removed");
        }
    }
}

#[async_trait]
impl ProgressPublisher for InProcProgressChannel {
    async fn publish(&self, job_id: JobId, event: ProgressEvent) -> Result<()> {
        self.publish_local(job_id, event);
        Ok(())
    }
}

#[async_trait]
impl ProgressSubscriber for InProcProgressChannel {
    async fn subscribe(&self, job_id: JobId) -> Result<Subscription> {
        Ok(self.subscribe_local(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScanStatus;
    use futures::StreamExt;
    use uuid::Uuid;

    fn job(n: u128) -> JobId {
        JobId(Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn frames_are_sequenced_per_topic() {
        let channel = InProcProgressChannel::new(8);
        let mut sub = channel.subscribe_local(job(1));

        channel.publish_local(job(1), ProgressEvent::running(1, "a"));
        channel.publish_local(job(1), ProgressEvent::running(2, "b"));

        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.event.progress(), 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_creates_no_topic() {
        let channel = InProcProgressChannel::default();
        assert!(
            channel
                .publish_local(job(9), ProgressEvent::running(5, "x"))
                .is_none()
        );
        assert_eq!(channel.topic_count(), 0);
    }

    #[tokio::test]
    async fn last_drop_removes_topic() {
        let channel = InProcProgressChannel::default();
        let a = channel.subscribe_local(job(3));
        let b = channel.subscribe_local(job(3));
        assert_eq!(channel.subscriber_count(job(3)), 2);

        drop(a);
        assert_eq!(channel.subscriber_count(job(3)), 1);
        assert_eq!(channel.topic_count(), 1);

        drop(b);
        assert_eq!(channel.topic_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead_instead_of_blocking() {
        let channel = InProcProgressChannel::new(2);
        let mut sub = channel.subscribe_local(job(4));

        for progress in 1..=5 {
            channel.publish_local(job(4), ProgressEvent::running(progress, "s"));
        }
        channel.publish_local(
            job(4),
            ProgressEvent::Progress {
                progress: 5,
                step: None,
                status: ScanStatus::Cancelled,
            },
        );

        let next = sub.next().await.unwrap();
        assert!(next.sequence > 1);
    }
}
