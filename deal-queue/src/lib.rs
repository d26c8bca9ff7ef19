//! # deal-queue: Resilience-Protected Analysis Job Queue
//!
//! **Admission control and backpressure in front of expensive, fallible, billable work**
//!
//! deal-queue schedules asynchronous analysis jobs (deal scoring, document
//! analysis, strategy propagation) and guards every execution with:
//!
//! - **Kill switches**: global and per-operation flags that block new work immediately
//! - **Idempotency locks**: at most one concurrent run per (operation, subject)
//! - **Circuit breakers**: per-operation failure threshold plus a call budget that caps cost
//! - **Cooldown scheduling**: a polling scheduler with a per-tick batch cap
//! - **Typed payloads**: a closed set of job kinds validated at enqueue time
//! - **Structured audit events**: enqueue, completion, kill switch and breaker transitions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deal_queue::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> QueueResult<()> {
//! let clock = deal_queue::clock::system_clock();
//! let manager = QueueManager::new(
//!     MemoryJobStore::with_clock(clock.clone()),
//!     ResilienceOrchestrator::in_memory(clock.clone()),
//!     clock,
//! );
//!
//! manager.register_handler(handler_fn(JobKind::DealAnalysis, |job| async move {
//!     tracing::info!(deal = %job.subject_ref, "scoring deal");
//!     Ok(())
//! }))?;
//!
//! manager
//!     .queue_job(QueueJobRequest {
//!         kind: "deal_analysis".into(),
//!         tenant_id: "fund-a".into(),
//!         trigger_reason: "deal updated".into(),
//!         subject_ref: None,
//!         payload: json!({ "deal_id": "deal-42" }),
//!         options: EnqueueOptions::default().with_priority(JobPriority::High),
//!     })
//!     .await?;
//!
//! let scheduler = Scheduler::new(manager, SchedulerConfig::default());
//! scheduler.start();
//! let controls = OperatorControls::new(scheduler.clone());
//! let health = controls.system_health().await;
//! assert!(health.active_kill_switches.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod observability;
pub mod operator;
pub mod queue;
pub mod resilience;
pub mod scheduler;
pub mod store;
pub mod types;

// Core API exports
pub use types::{
    AuditEvent, DealAnalysisPayload, DocumentAnalysisPayload, JobId, JobKind, JobPayload, JobPriority,
    JobRecord, JobStatus, NoteAnalysisPayload, QueueCtx, StrategyChangePayload,
};
pub use error::{JobError, QueueError, QueueResult};
pub use config::{BreakerConfig, QueueConfig, ResilienceConfig, SchedulerConfig};
pub use store::{ClaimFilter, JobStore, MemoryJobStore, QueueStats};
pub use resilience::{
    Admission, AnalysisOptions, CircuitBreakerRegistry, CircuitState, IdempotencyGuard, KillSwitchRegistry,
    KillSwitchScope, Outcome, ResilienceOrchestrator, SkipReason,
};
pub use queue::{
    handler_fn, CleanupReport, EnqueueOptions, HandlerRegistry, JobHandler, ProcessSummary, QueueJobRequest,
    QueueManager, RetentionReaper,
};
pub use scheduler::{Scheduler, SchedulerState, TickOutcome};
pub use operator::{OperatorControls, SystemHealth};

// Observability exports
pub use observability::{LiveMetrics, ObservabilityLayer};

/// Everything needed to wire a guarded queue
pub mod prelude {
    pub use crate::{
        handler_fn, EnqueueOptions, JobHandler, OperatorControls, QueueJobRequest, QueueManager, ResilienceOrchestrator,
        Scheduler,
    };

    pub use crate::{
        JobError, JobId, JobKind, JobPayload, JobPriority, JobRecord, JobStatus, KillSwitchScope, Outcome,
        QueueCtx, QueueResult, SkipReason,
    };

    pub use crate::{BreakerConfig, MemoryJobStore, QueueConfig, SchedulerConfig};

    pub use crate::{LiveMetrics, ObservabilityLayer};

    pub use async_trait::async_trait;
}
