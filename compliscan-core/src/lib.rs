//! # Compliscan Core
//!
//! Multi-tenant background compliance scans with live progress fan-out.
//!
//! ## Overview
//!
//! A tenant submits a domain. The job is stored as `pending`, queued, claimed
//! by exactly one worker and driven through an ordered plan of steps. Each
//! step persists its findings and progress and publishes a frame on the job's
//! topic; connected clients receive those frames through a
//! [`notify::ClientFeed`]. Finalize scores the run, marks it `complete` and
//! creates the job's single [`types::Report`].
//!
//! ## Feature Flags
//!
//! - `database` (default): Postgres store and `LISTEN/NOTIFY` progress relay
//!   via SQLx, Redis-backed submission limiter
//! - `postgres-tests`: integration tests that need a live `DATABASE_URL`
//!
//! ## Architecture
//!
//! - [`types`]: job, outcome and report records
//! - [`store`]: tenant-scoped persistence with guarded atomic updates
//! - [`queue`]: hand-off from the request path to the workers
//! - [`channel`]: per-job progress pub/sub
//! - [`executor`]: step plan, runner and scorer; runs one job end to end
//! - [`runtime`]: the worker pool
//! - [`submission`], [`control`], [`notify`]: the operations the HTTP layer
//!   exposes
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use compliscan_core::{
//!     channel::InProcProgressChannel,
//!     executor::ScanExecutor,
//!     queue::MemoryJobQueue,
//!     runtime::WorkerPool,
//!     store::MemoryJobStore,
//!     submission::{SlidingWindowLimiter, SubmissionGateway, SubmitScan},
//!     types::TenantId,
//! };
//!
//! async fn run(tenant: TenantId) -> compliscan_core::error::Result<()> {
//!     let store = Arc::new(MemoryJobStore::new());
//!     let queue = Arc::new(MemoryJobQueue::new());
//!     let channel = Arc::new(InProcProgressChannel::default());
//!
//!     let executor = Arc::new(ScanExecutor::new(
//!         store.clone(),
//!         store.clone(),
//!         channel.clone(),
//!     ));
//!     let pool = WorkerPool::spawn(executor, queue.clone(), 2);
//!
//!     let gateway = SubmissionGateway::new(
//!         store,
//!         queue,
//!         Arc::new(SlidingWindowLimiter::default()),
//!     );
//!     let submitted = gateway
//!         .submit(tenant, SubmitScan { domain: "example.com".into() })
//!         .await?;
//!     println!("queued {}", submitted.job_id);
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Per-job progress topics and their transports
pub mod channel;

/// Runtime knobs shared with the server configuration
pub mod config;

/// Cancel, retry and read-side operations
pub mod control;

/// Error types and the crate-wide `Result`
pub mod error;

/// Step plan, runners, scoring and the job executor
pub mod executor;

/// Client-facing progress feeds
pub mod notify;

/// Work hand-off between request path and workers
pub mod queue;

/// Worker pool and startup recovery
pub mod runtime;

/// Durable job and report records
pub mod store;

/// Validation, throttling and creation of new scans
pub mod submission;

/// Domain records
pub mod types;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{Result, ScanError};
