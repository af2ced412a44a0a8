//! # Workflow Orchestration Engine
//!
//! A PostgreSQL-backed DAG orchestration engine for DevOps automation
//! workflows: incident response, postmortem publication, and knowledge-base
//! synchronization.
//!
//! ## Features
//!
//! - **DAG-composed workflows**: sequence/group/chord combinators instead of
//!   hand-rolled state machines
//! - **Automatic retries**: configurable retry policies with exponential
//!   backoff and jitter
//! - **Circuit breakers**: process-local protection for external
//!   collaborators (LLM, GitHub, vector store, notifier)
//! - **Distributed locking and snapshot caching**: Redis-backed, guarding
//!   against duplicate workflow advancement and giving dashboards a fast
//!   read path
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                           │
//! │     (composes/advances/cancels DAG-shaped workflows)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!         StateStore      HandlerRegistry   SnapshotCache
//!       (Postgres/memory)  (capabilities)     (Redis)
//!                              │
//!                              ▼
//!                          WorkerPool
//!           (executes ready steps, retries, advances)
//! ```

pub mod cache;
pub mod capabilities;
pub mod clock;
pub mod config;
pub mod dag;
pub mod error;
pub mod handlers;
pub mod lock;
pub mod observability;
pub mod orchestrator;
pub mod persistence;
pub mod registry;
pub mod reliability;
pub mod worker;
pub mod workflows;

/// Prelude for common imports
pub mod prelude {
    pub use crate::cache::SnapshotCache;
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::EngineConfig;
    pub use crate::dag::{DagError, DagNode};
    pub use crate::error::{CapabilityError, ErrorKind};
    pub use crate::lock::DistributedLock;
    pub use crate::orchestrator::{
        AdvanceResult, CancelResult, Orchestrator, OrchestratorError, ReadyStep, StepOutcome,
    };
    pub use crate::persistence::{
        InMemoryStateStore, PostgresStateStore, StateStore, StepStatus, StoreError,
        WorkflowStatus,
    };
    pub use crate::registry::{Handler, HandlerRegistry, RegistryError};
    pub use crate::reliability::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
    pub use crate::worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError};
}

pub use cache::SnapshotCache;
pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use dag::{DagError, DagNode};
pub use error::{CapabilityError, ErrorKind};
pub use lock::DistributedLock;
pub use orchestrator::{
    AdvanceResult, CancelResult, Orchestrator, OrchestratorError, ReadyStep, StepOutcome,
};
pub use persistence::{
    InMemoryStateStore, PostgresStateStore, StateStore, StepStatus, StoreError, WorkflowStatus,
};
pub use registry::{Handler, HandlerRegistry, RegistryError};
pub use reliability::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError};
