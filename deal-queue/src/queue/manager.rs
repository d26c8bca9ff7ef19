use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::handler::{HandlerRegistry, JobHandler};
use crate::clock::{to_chrono, SharedClock};
use crate::config::QueueConfig;
use crate::resilience::{Outcome, ResilienceOrchestrator, SkipReason};
use crate::store::{ClaimFilter, JobStore, QueueStats};
use crate::types::AuditEvent;
use crate::{JobError, JobId, JobKind, JobPayload, JobPriority, JobRecord, JobStatus, QueueCtx, QueueError, QueueResult};

/// Error detail recorded on rows failed because a kill switch was on
pub const KILL_SWITCH_SKIP_DETAIL: &str = "skipped: kill switch";

/// Scheduling options for a new job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub priority: JobPriority,
    /// Not eligible until this long after enqueue
    pub delay: Option<Duration>,
    /// Overrides the kind's default queue
    pub queue: Option<String>,
}

impl EnqueueOptions {
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_delay_minutes(self, minutes: u64) -> Self {
        self.with_delay(Duration::from_secs(minutes * 60))
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

/// Untyped enqueue request, validated against the kind allow-list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJobRequest {
    pub kind: String,
    pub tenant_id: String,
    pub trigger_reason: String,
    /// Defaults to the payload's subject id
    #[serde(default)]
    pub subject_ref: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub options: EnqueueOptions,
}

/// Result of one `process_queue` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    /// Rows claimed from the store
    pub claimed: usize,
    /// Rows whose handler completed
    pub processed: usize,
    /// Rows marked failed, including kill-switch skips
    pub failed: usize,
    /// Rows returned to the queue without being consumed
    pub requeued: usize,
    /// Rows whose status update failed; cleanup expires them later
    pub store_errors: usize,
}

/// Result of one `cleanup` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Abandoned in-flight rows moved to expired
    pub expired: usize,
    /// Terminal rows deleted after retention
    pub deleted: usize,
    /// Abandoned idempotency locks removed
    pub locks_reclaimed: usize,
}

/// Builds and submits jobs, and drains queues through the orchestrator
pub struct QueueManager<S: JobStore> {
    store: Arc<S>,
    handlers: Arc<RwLock<HandlerRegistry>>,
    orchestrator: ResilienceOrchestrator,
    clock: SharedClock,
    config: QueueConfig,
}

impl<S: JobStore> Clone for QueueManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            handlers: self.handlers.clone(),
            orchestrator: self.orchestrator.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: JobStore> QueueManager<S> {
    pub fn new(store: S, orchestrator: ResilienceOrchestrator, clock: SharedClock) -> Self {
        Self::with_config(store, orchestrator, clock, QueueConfig::default())
    }

    pub fn with_config(
        store: S,
        orchestrator: ResilienceOrchestrator,
        clock: SharedClock,
        config: QueueConfig,
    ) -> Self {
        Self {
            store: Arc::new(store),
            handlers: Arc::new(RwLock::new(HandlerRegistry::new())),
            orchestrator,
            clock,
            config,
        }
    }

    /// Replace the handler registry
    pub fn with_handlers(self, registry: HandlerRegistry) -> Self {
        *self.handlers.write() = registry;
        self
    }

    /// Register a handler for its kind
    pub fn register_handler<H: JobHandler + 'static>(&self, handler: H) -> QueueResult<()> {
        let kind = handler.kind();
        self.handlers.write().register(handler)?;
        info!(kind = %kind, "Registered job handler");
        Ok(())
    }

    /// Validate and enqueue an untyped request
    #[instrument(skip(self, request), fields(kind = %request.kind, tenant_id = %request.tenant_id))]
    pub async fn queue_job(&self, request: QueueJobRequest) -> QueueResult<JobId> {
        let kind: JobKind = request.kind.parse().map_err(|err| {
            warn!(kind = %request.kind, "Rejected job of unknown kind");
            err
        })?;
        let payload = JobPayload::from_value(kind, request.payload)?;

        self.insert_job(
            request.tenant_id,
            payload,
            request.subject_ref,
            request.trigger_reason,
            request.options,
        )
        .await
    }

    /// Enqueue a typed payload on behalf of the context's tenant and actor
    #[instrument(skip(self, ctx, payload), fields(tenant_id = %ctx.tenant_id, kind = %payload.kind()))]
    pub async fn enqueue(&self, ctx: &QueueCtx, payload: JobPayload, options: EnqueueOptions) -> QueueResult<JobId> {
        self.insert_job(ctx.tenant_id.clone(), payload, None, ctx.actor().to_string(), options)
            .await
    }

    async fn insert_job(
        &self,
        tenant_id: String,
        payload: JobPayload,
        subject_ref: Option<String>,
        trigger_reason: String,
        options: EnqueueOptions,
    ) -> QueueResult<JobId> {
        let kind = payload.kind();
        if tenant_id.trim().is_empty() {
            return Err(QueueError::InvalidPayload {
                kind: kind.to_string(),
                reason: "tenant id must not be empty".to_string(),
            });
        }

        let now = self.clock.now();
        let not_before = match options.delay {
            Some(delay) => now.checked_add_signed(to_chrono(delay)).unwrap_or(DateTime::<Utc>::MAX_UTC),
            None => now,
        };
        let queue = options.queue.unwrap_or_else(|| kind.default_queue().to_string());
        let subject_ref = subject_ref.unwrap_or_else(|| payload.subject_id().to_string());

        let record = JobRecord::new(
            tenant_id,
            queue,
            payload,
            subject_ref,
            options.priority,
            not_before,
            trigger_reason,
            now,
        );
        let (tenant_id, queue, trigger_reason) =
            (record.tenant_id.clone(), record.queue.clone(), record.trigger_reason.clone());

        let job_id = self.store.insert(record).await?;

        info!(job_id = %job_id, queue = %queue, priority = %options.priority, "Enqueued job");
        self.orchestrator.observability().record(AuditEvent::JobEnqueued {
            job_id,
            tenant_id,
            queue,
            kind,
            trigger_reason,
            at: now,
        });
        Ok(job_id)
    }

    /// Claim up to `limit` eligible rows of `queue` and run each through the
    /// `process_<queue>` operation
    #[instrument(skip(self))]
    pub async fn process_queue(&self, queue: &str, worker_id: &str, limit: usize) -> QueueResult<ProcessSummary> {
        let filter = ClaimFilter::new(self.clock.now(), worker_id);
        self.drain(queue, filter, limit).await
    }

    /// Same as `process_queue`, restricted to one tenant's rows
    #[instrument(skip(self))]
    pub async fn process_tenant_queue(
        &self,
        queue: &str,
        tenant_id: &str,
        worker_id: &str,
        limit: usize,
    ) -> QueueResult<ProcessSummary> {
        let filter = ClaimFilter::new(self.clock.now(), worker_id).for_tenant(tenant_id);
        self.drain(queue, filter, limit).await
    }

    async fn drain(&self, queue: &str, filter: ClaimFilter, limit: usize) -> QueueResult<ProcessSummary> {
        let operation = Self::operation_name(queue);
        let worker_id = filter.worker_id.clone();

        let claimed = self.store.claim_batch(queue, limit, &filter).await.map_err(|err| {
            error!(queue, error = %err, "Claim failed");
            err
        })?;

        let mut summary = ProcessSummary {
            claimed: claimed.len(),
            ..ProcessSummary::default()
        };
        if claimed.is_empty() {
            debug!(queue, "No eligible jobs");
            return Ok(summary);
        }

        let mut batch = claimed.into_iter();
        while let Some(job) = batch.next() {
            let handler = self.handlers.read().get(job.kind);
            let Some(handler) = handler else {
                let err = JobError::Unhandled(job.kind.to_string());
                self.settle(&job, JobStatus::Failed, Some(err.to_string()), &mut summary)
                    .await;
                continue;
            };

            if let Err(err) = self.store.update_status(job.id, JobStatus::Processing, None).await {
                error!(job_id = %job.id, error = %err, "Could not mark job processing");
                summary.store_errors += 1;
                continue;
            }

            let handler: &dyn JobHandler = handler.as_ref();
            let current = &job;
            let outcome = self
                .orchestrator
                .execute_simple_operation(&operation, move || handler.handle(current), &self.config.breaker)
                .await;

            match outcome {
                Outcome::Success(()) => {
                    self.settle(&job, JobStatus::Completed, None, &mut summary).await;
                }
                Outcome::Failure(err) => {
                    self.settle(&job, JobStatus::Failed, Some(err.to_string()), &mut summary)
                        .await;
                }
                Outcome::Skipped(SkipReason::KillSwitch) => {
                    self.settle(&job, JobStatus::Failed, Some(KILL_SWITCH_SKIP_DETAIL.to_string()), &mut summary)
                        .await;
                }
                Outcome::Skipped(reason) => {
                    self.settle(&job, JobStatus::Queued, Some(format!("skipped: {}", reason)), &mut summary)
                        .await;

                    // Every later row would be rejected the same way
                    if matches!(reason, SkipReason::CircuitOpen | SkipReason::CallBudgetExceeded) {
                        for rest in batch.by_ref() {
                            self.settle(&rest, JobStatus::Queued, Some(format!("skipped: {}", reason)), &mut summary)
                                .await;
                        }
                    }
                }
            }
        }

        info!(
            queue,
            worker_id = %worker_id,
            processed = summary.processed,
            failed = summary.failed,
            requeued = summary.requeued,
            "Batch processed"
        );
        self.orchestrator.observability().record(AuditEvent::BatchProcessed {
            queue: queue.to_string(),
            worker_id,
            processed: summary.processed,
            failed: summary.failed,
            requeued: summary.requeued,
            at: self.clock.now(),
        });
        Ok(summary)
    }

    /// Write a row's final status for this batch and record the matching event
    async fn settle(&self, job: &JobRecord, status: JobStatus, detail: Option<String>, summary: &mut ProcessSummary) {
        if let Err(err) = self.store.update_status(job.id, status, detail.clone()).await {
            error!(job_id = %job.id, status = %status, error = %err, "Could not record job status");
            summary.store_errors += 1;
            return;
        }

        let at = self.clock.now();
        let tenant_id = job.tenant_id.clone();
        let event = match status {
            JobStatus::Completed => {
                summary.processed += 1;
                info!(job_id = %job.id, kind = %job.kind, "Job completed");
                AuditEvent::JobCompleted {
                    job_id: job.id,
                    tenant_id,
                    at,
                }
            }
            JobStatus::Queued => {
                summary.requeued += 1;
                let reason = detail.unwrap_or_default();
                debug!(job_id = %job.id, reason = %reason, "Job returned to queue");
                AuditEvent::JobRequeued {
                    job_id: job.id,
                    tenant_id,
                    reason,
                    at,
                }
            }
            _ => {
                summary.failed += 1;
                let error = detail.unwrap_or_default();
                warn!(job_id = %job.id, kind = %job.kind, error = %error, "Job failed");
                AuditEvent::JobFailed {
                    job_id: job.id,
                    tenant_id,
                    error,
                    at,
                }
            }
        };
        self.orchestrator.observability().record(event);
    }

    /// Expire abandoned claims, delete terminal rows past retention and
    /// reclaim abandoned idempotency locks
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> QueueResult<CleanupReport> {
        let now = self.clock.now();
        let locks_reclaimed = self.orchestrator.guard().reclaim_abandoned(self.config.lock_ttl);

        let expired = self
            .store
            .expire_stale(cutoff(now, self.config.stale_claim_timeout))
            .await?;
        let deleted = self.store.delete_expired(cutoff(now, self.config.retention)).await?;

        let report = CleanupReport {
            expired,
            deleted,
            locks_reclaimed,
        };
        info!(expired, deleted, locks_reclaimed, "Cleanup finished");
        Ok(report)
    }

    /// Per-status counts, optionally for one tenant
    pub async fn queue_stats(&self, tenant_id: Option<&str>) -> QueueResult<QueueStats> {
        self.store.stats(tenant_id).await
    }

    pub async fn get_job(&self, job_id: JobId) -> QueueResult<JobRecord> {
        self.store.get(job_id).await
    }

    /// Operation name guarding drains of `queue`
    pub fn operation_name(queue: &str) -> String {
        format!("process_{}", queue)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn orchestrator(&self) -> &ResilienceOrchestrator {
        &self.orchestrator
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(to_chrono(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
