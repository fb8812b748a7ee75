//! Wires stores, queue, progress channel, limiter and workers into an
//! [`AppState`] according to the resolved [`Config`].

use std::{fmt, sync::Arc};

use anyhow::{Context, Result};
use compliscan_core::{
    channel::{
        InProcProgressChannel, PgNotifyProgressChannel, ProgressPublisher,
        ProgressSubscriber,
    },
    control::ControlSurface,
    executor::ScanExecutor,
    notify::NotificationGateway,
    queue::{JobQueue, MemoryJobQueue, PollingJobQueue, PollingJobQueueConfig},
    runtime::{WorkerPool, recover_pending},
    store::{JobStore, MemoryJobStore, PostgresJobStore, ReportStore},
    submission::{
        RedisSlidingWindowLimiter, SlidingWindowLimiter, SubmissionGateway,
        SubmissionLimiter,
    },
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::infra::{app_state::AppState, config::Config};

/// Everything `main` has to keep alive and tear down.
pub struct Runtime {
    pub state: AppState,
    pub pool: WorkerPool,
    relay: Option<(CancellationToken, JoinHandle<()>)>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pool", &self.pool)
            .field("relay", &self.relay.is_some())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Drain the workers, then stop the progress relay.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
        if let Some((token, handle)) = self.relay {
            token.cancel();
            if let Err(err) = handle.await {
                warn!(error = ?err, "progress relay task failed");
            }
        }
    }
}

struct Backends {
    store: Arc<dyn JobStore>,
    reports: Arc<dyn ReportStore>,
    queue: Arc<dyn JobQueue>,
    publisher: Arc<dyn ProgressPublisher>,
    subscriber: Arc<dyn ProgressSubscriber>,
    limiter: Arc<dyn SubmissionLimiter>,
}

/// Build the production runtime: Postgres-backed when a database URL is
/// configured, in-memory otherwise.
pub async fn build_runtime(config: Config) -> Result<Runtime> {
    let limiter = build_limiter(&config).await?;

    let Some(database_url) = config.database.url.clone() else {
        info!("no database configured; using in-memory store and queue");
        let backends = memory_backends(&config, limiter);
        return start(config, backends, |executor| executor).await;
    };

    let store = Arc::new(
        PostgresJobStore::connect(&database_url)
            .await
            .context("failed to connect to database")?,
    );
    store.migrate().await.context("failed to run migrations")?;
    info!("database ready");

    let queue = Arc::new(PollingJobQueue::new(
        store.clone(),
        PollingJobQueueConfig {
            poll_interval: config.scanner.poll_interval(),
            ..PollingJobQueueConfig::default()
        },
    ));
    let channel = Arc::new(PgNotifyProgressChannel::new(
        store.pool().clone(),
        InProcProgressChannel::new(config.scanner.channel_capacity),
    ));
    let relay_token = CancellationToken::new();
    let relay = channel
        .spawn_relay(relay_token.clone())
        .await
        .context("failed to start progress relay")?;

    let backends = Backends {
        store: store.clone(),
        reports: store,
        queue,
        publisher: channel.clone(),
        subscriber: channel,
        limiter,
    };
    let mut runtime = start(config, backends, |executor| executor).await?;
    runtime.relay = Some((relay_token, relay));
    Ok(runtime)
}

/// In-memory runtime; `tune` adjusts the executor before workers start.
pub async fn build_memory_runtime<F>(config: Config, tune: F) -> Result<Runtime>
where
    F: FnOnce(ScanExecutor) -> ScanExecutor,
{
    let limiter: Arc<dyn SubmissionLimiter> =
        Arc::new(SlidingWindowLimiter::from_config(&config.rate_limit));
    let backends = memory_backends(&config, limiter);
    start(config, backends, tune).await
}

fn memory_backends(
    config: &Config,
    limiter: Arc<dyn SubmissionLimiter>,
) -> Backends {
    let store = Arc::new(MemoryJobStore::new());
    let channel =
        Arc::new(InProcProgressChannel::new(config.scanner.channel_capacity));
    Backends {
        store: store.clone(),
        reports: store,
        queue: Arc::new(MemoryJobQueue::new()),
        publisher: channel.clone(),
        subscriber: channel,
        limiter,
    }
}

async fn build_limiter(config: &Config) -> Result<Arc<dyn SubmissionLimiter>> {
    match &config.redis {
        Some(redis) => {
            let limiter =
                RedisSlidingWindowLimiter::connect(&redis.url, &config.rate_limit)
                    .await
                    .context("failed to connect to redis")?;
            info!("submission limiter backed by redis");
            Ok(Arc::new(limiter))
        }
        None => Ok(Arc::new(SlidingWindowLimiter::from_config(
            &config.rate_limit,
        ))),
    }
}

async fn start<F>(config: Config, backends: Backends, tune: F) -> Result<Runtime>
where
    F: FnOnce(ScanExecutor) -> ScanExecutor,
{
    let Backends {
        store,
        reports,
        queue,
        publisher,
        subscriber,
        limiter,
    } = backends;

    let executor = tune(
        ScanExecutor::new(store.clone(), reports.clone(), publisher)
            .with_config(&config.scanner),
    );

    let recovered = recover_pending(store.as_ref(), queue.as_ref())
        .await
        .context("failed to re-enqueue pending scans")?;
    if recovered > 0 {
        info!(recovered, "resuming scans left pending before restart");
    }

    let pool = WorkerPool::spawn(
        Arc::new(executor),
        queue.clone(),
        config.scanner.workers,
    );

    let state = AppState {
        submissions: Arc::new(SubmissionGateway::new(
            store.clone(),
            queue.clone(),
            limiter,
        )),
        control: Arc::new(ControlSurface::new(store.clone(), reports, queue)),
        notifications: Arc::new(NotificationGateway::new(store, subscriber)),
        config: Arc::new(config),
    };

    Ok(Runtime {
        state,
        pool,
        relay: None,
    })
}
