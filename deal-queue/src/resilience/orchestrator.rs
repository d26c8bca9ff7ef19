//! Admission control around caller-supplied work.
//!
//! Every guarded call passes the same gates in order: kill switch, then
//! idempotency lock, then circuit breaker. Only then does the work run.
//! Rejections come back as [`Outcome::Skipped`]; handler errors and panics come
//! back as [`Outcome::Failure`] and never escape this boundary.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, warn};

use super::circuit_breaker::{Admission, CircuitBreakerRegistry};
use super::idempotency::{Acquisition, IdempotencyGuard};
use super::kill_switch::{KillSwitchRegistry, KillSwitchScope};
use super::outcome::{Outcome, SkipReason};
use crate::clock::SharedClock;
use crate::config::BreakerConfig;
use crate::observability::ObservabilityLayer;
use crate::JobError;

/// Subject used by operations that are not tied to one entity
pub const SYSTEM_SUBJECT: &str = "system";

/// Per-call options for [`ResilienceOrchestrator::execute_analysis_operation`]
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    /// Run without taking the idempotency lock
    pub skip_idempotency: bool,
    /// Staleness bound for the lock; `None` holds it for the call only
    pub lock_ttl: Option<Duration>,
    pub breaker: BreakerConfig,
}

impl AnalysisOptions {
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    pub fn without_idempotency(mut self) -> Self {
        self.skip_idempotency = true;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

/// Composes kill switches, idempotency and circuit breakers
#[derive(Clone)]
pub struct ResilienceOrchestrator {
    kill_switches: Arc<KillSwitchRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    guard: IdempotencyGuard,
    observability: Arc<ObservabilityLayer>,
}

impl ResilienceOrchestrator {
    pub fn new(
        kill_switches: Arc<KillSwitchRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        guard: IdempotencyGuard,
        observability: Arc<ObservabilityLayer>,
    ) -> Self {
        Self {
            kill_switches,
            breakers,
            guard,
            observability,
        }
    }

    /// Isolated orchestrator with in-memory kill switch storage
    pub fn in_memory(clock: SharedClock) -> Self {
        let observability = Arc::new(ObservabilityLayer::new());
        Self::new(
            Arc::new(KillSwitchRegistry::in_memory(clock.clone(), observability.clone())),
            Arc::new(CircuitBreakerRegistry::new(clock.clone(), observability.clone())),
            IdempotencyGuard::new(clock),
            observability,
        )
    }

    pub fn kill_switches(&self) -> &Arc<KillSwitchRegistry> {
        &self.kill_switches
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub fn observability(&self) -> &Arc<ObservabilityLayer> {
        &self.observability
    }

    /// Run per-entity work under all three gates
    pub async fn execute_analysis_operation<T, F, Fut>(
        &self,
        operation: &str,
        subject_id: &str,
        work: F,
        actor_id: &str,
        options: &AnalysisOptions,
    ) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        if self.kill_switches.is_disabled(operation).await {
            return self.skipped(operation, subject_id, actor_id, SkipReason::KillSwitch);
        }

        // Held until this function returns, on every path
        let _lease = if options.skip_idempotency {
            None
        } else {
            match self.guard.try_acquire(operation, subject_id, options.lock_ttl) {
                Acquisition::Acquired(lease) => Some(lease),
                Acquisition::AlreadyInProgress => {
                    return self.skipped(operation, subject_id, actor_id, SkipReason::InProgress);
                }
            }
        };

        if let Admission::Rejected(reason) = self.breakers.admit(operation, &options.breaker) {
            return self.skipped(operation, subject_id, actor_id, reason);
        }

        let result = AssertUnwindSafe(async move { work().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic))));

        match result {
            Ok(value) => {
                self.breakers.record_success(operation);
                debug!(operation, subject_id, actor = actor_id, "Operation succeeded");
                Outcome::Success(value)
            }
            Err(err) => {
                self.breakers.record_failure(operation);
                match &err {
                    JobError::Panicked(msg) => {
                        error!(operation, subject_id, actor = actor_id, panic = %msg, "Operation panicked")
                    }
                    _ => warn!(operation, subject_id, actor = actor_id, error = %err, "Operation failed"),
                }
                Outcome::Failure(err)
            }
        }
    }

    /// Run system-level work keyed by operation name only
    pub async fn execute_simple_operation<T, F, Fut>(
        &self,
        operation: &str,
        work: F,
        breaker: &BreakerConfig,
    ) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let options = AnalysisOptions {
            breaker: breaker.clone(),
            ..AnalysisOptions::default()
        };
        self.execute_analysis_operation(operation, SYSTEM_SUBJECT, work, SYSTEM_SUBJECT, &options)
            .await
    }

    /// Operator recovery: force a breaker closed
    pub fn reset_breaker(&self, operation: &str) {
        self.breakers.reset(operation);
    }

    /// Whether the global switch or the switch for `operation` is on (fails closed)
    pub async fn is_blocked(&self, operation: &str) -> bool {
        self.kill_switches.is_disabled(KillSwitchScope::from(operation)).await
    }

    fn skipped<T>(&self, operation: &str, subject_id: &str, actor_id: &str, reason: SkipReason) -> Outcome<T> {
        debug!(operation, subject_id, actor = actor_id, reason = %reason, "Operation skipped");
        self.observability.metrics().record_skip(reason.as_str());
        Outcome::Skipped(reason)
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
