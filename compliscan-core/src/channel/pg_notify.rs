use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, postgres::PgListener};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    InProcProgressChannel, ProgressEvent, ProgressPublisher,
    ProgressSubscriber, Subscription,
};
use crate::error::{Result, ScanError};
use crate::types::JobId;

pub const PROGRESS_NOTIFY_CHANNEL: &str = "scan_progress";

const RELAY_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize, Deserialize)]
struct NotifyPayload {
    job_id: JobId,
    event: ProgressEvent,
}

/// Deployment-wide progress channel built on Postgres `LISTEN/NOTIFY`.
///
/// Executors in any process publish through `pg_notify`; every process runs
/// one relay that feeds received notifications into its local
/// [`InProcProgressChannel`], which is where gateway subscriptions live.
#[derive(Clone)]
pub struct PgNotifyProgressChannel {
    pool: PgPool,
    local: InProcProgressChannel,
}

impl PgNotifyProgressChannel {
    pub fn new(pool: PgPool, local: InProcProgressChannel) -> Self {
        Self { pool, local }
    }

    pub fn local(&self) -> &InProcProgressChannel {
        &self.local
    }

    /// Start the listener that relays notifications into the local channel.
    pub async fn spawn_relay(
        &self,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(PROGRESS_NOTIFY_CHANNEL).await?;
        info!(channel = PROGRESS_NOTIFY_CHANNEL, "progress relay listening");

        let local = self.local.clone();
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("progress relay shutting down");
                        break;
                    }
                    received = listener.recv() => match received {
                        Ok(notification) => {
                            match serde_json::from_str::<NotifyPayload>(
                                notification.payload(),
                            ) {
                                Ok(payload) => {
                                    local.publish_local(payload.job_id, payload.event);
                                }
                                Err(err) => {
                                    warn!(error = %err, "dropping malformed progress notification");
                                }
                            }
                        }
                        Err(err) => {
                            // PgListener reconnects on the next recv.
                            warn!(error = %err, "progress relay connection error");
                            tokio::time::sleep(RELAY_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }))
    }
}

impl fmt::Debug for PgNotifyProgressChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgNotifyProgressChannel")
            .field("pool_size", &self.pool.size())
            .field("local", &self.local)
            .finish()
    }
}

#[async_trait]
impl ProgressPublisher for PgNotifyProgressChannel {
    async fn publish(&self, job_id: JobId, event: ProgressEvent) -> Result<()> {
        let payload = serde_json::to_string(&NotifyPayload { job_id, event })?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(PROGRESS_NOTIFY_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|err| ScanError::Publish(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ProgressSubscriber for PgNotifyProgressChannel {
    async fn subscribe(&self, job_id: JobId) -> Result<Subscription> {
        Ok(self.local.subscribe_local(job_id))
    }
}
