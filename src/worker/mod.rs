//! Step execution for composed workflows
//!
//! This module provides [`WorkerPool`]: a semaphore-bounded driver that
//! executes an [`crate::orchestrator::Orchestrator`]'s `ReadyStep`s and
//! feeds their outcomes back through `advance` until the workflow reaches
//! a terminal status.
//!
//! The teacher's `poller`/`backpressure` submodules (adaptive polling
//! backoff and high/low-watermark load shedding against a shared task
//! queue) were trimmed here: [`crate::persistence::StateStore`] has no
//! independent task queue to poll — steps arrive directly as the return
//! value of `compose`/`advance` — so there is nothing left for either
//! module to manage. See `DESIGN.md` for the full rationale.
//!
//! # Example
//!
//! ```ignore
//! use workflow_engine::worker::{WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::new(orchestrator, WorkerPoolConfig::new().with_max_concurrency(20));
//! let status = pool.run_to_completion(workflow_id, ready_steps).await?;
//! ```

mod pool;

pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
