//! Operator controls: force a drain, reset breakers, flip kill switches and
//! read a health report covering every known operation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::observability::MetricsSnapshot;
use crate::resilience::{ActiveLock, BreakerSnapshot, CircuitState, KillSwitch, KillSwitchScope};
use crate::scheduler::{Scheduler, SchedulerStatus, TickOutcome};
use crate::store::{JobStore, QueueStats};
use crate::QueueResult;

/// Health of one operation name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHealth {
    pub operation: String,
    pub state: CircuitState,
    /// `None` until the operation has been admitted at least once
    pub breaker: Option<BreakerSnapshot>,
    /// Blocked by its own switch or the global one
    pub disabled: bool,
}

/// Point-in-time report for the operator surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub operations: Vec<OperationHealth>,
    pub global_disabled: bool,
    pub active_kill_switches: Vec<KillSwitch>,
    /// Set when kill switch state could not be read; every operation is then reported disabled
    pub kill_switch_error: Option<String>,
    pub active_locks: Vec<ActiveLock>,
    pub scheduler: SchedulerStatus,
    pub queue: Option<QueueStats>,
    pub queue_error: Option<String>,
    pub metrics: MetricsSnapshot,
}

impl SystemHealth {
    /// No open breaker, no active switch and every source readable
    pub fn is_healthy(&self) -> bool {
        self.kill_switch_error.is_none()
            && self.queue_error.is_none()
            && self.active_kill_switches.is_empty()
            && self.operations.iter().all(|op| op.state == CircuitState::Closed)
    }
}

/// Operator-facing controls over one scheduled queue
pub struct OperatorControls<S: JobStore> {
    scheduler: Scheduler<S>,
}

impl<S: JobStore + 'static> OperatorControls<S> {
    pub fn new(scheduler: Scheduler<S>) -> Self {
        Self { scheduler }
    }

    /// Drain now, bypassing the cooldown but not the kill switch
    pub async fn force_drain(&self) -> QueueResult<TickOutcome> {
        self.scheduler.force_processing().await
    }

    pub fn reset_breaker(&self, operation: &str) {
        info!(operation, "Operator breaker reset");
        self.scheduler.manager().orchestrator().reset_breaker(operation);
    }

    pub async fn activate_kill_switch(
        &self,
        scope: impl Into<KillSwitchScope>,
        reason: &str,
        actor: &str,
    ) -> QueueResult<()> {
        self.scheduler
            .manager()
            .orchestrator()
            .kill_switches()
            .activate(scope, reason, actor)
            .await
    }

    pub async fn deactivate_kill_switch(&self, scope: impl Into<KillSwitchScope>, actor: &str) -> QueueResult<()> {
        self.scheduler
            .manager()
            .orchestrator()
            .kill_switches()
            .deactivate(scope, actor)
            .await
    }

    /// Turn every switch on; `false` means at least one stayed off
    pub async fn emergency_shutdown(&self, reason: &str, actor: &str) -> bool {
        self.scheduler
            .manager()
            .orchestrator()
            .kill_switches()
            .emergency_shutdown(reason, actor)
            .await
    }

    pub async fn system_health(&self) -> SystemHealth {
        let manager = self.scheduler.manager();
        let orchestrator = manager.orchestrator();
        let kill_switches = orchestrator.kill_switches();

        let (active_kill_switches, kill_switch_error) = match kill_switches.list_active().await {
            Ok(active) => (active, None),
            Err(err) => {
                warn!(error = %err, "Could not read kill switches for health report");
                (Vec::new(), Some(err.to_string()))
            }
        };
        let global_disabled = kill_switch_error.is_some()
            || active_kill_switches.iter().any(|switch| switch.scope.is_global());
        let disabled_scopes: BTreeSet<&str> = active_kill_switches
            .iter()
            .map(|switch| switch.scope.as_str())
            .collect();

        let breakers = orchestrator.breakers();
        let mut names: BTreeSet<String> = breakers.operations().into_iter().collect();
        names.extend(kill_switches.known_scopes());
        names.extend(
            active_kill_switches
                .iter()
                .filter(|switch| !switch.scope.is_global())
                .map(|switch| switch.scope.to_string()),
        );

        let operations = names
            .into_iter()
            .map(|operation| {
                let breaker = breakers.snapshot(&operation);
                OperationHealth {
                    state: breakers.state(&operation),
                    disabled: global_disabled || disabled_scopes.contains(operation.as_str()),
                    breaker,
                    operation,
                }
            })
            .collect();

        let (queue, queue_error) = match manager.queue_stats(None).await {
            Ok(stats) => (Some(stats), None),
            Err(err) => (None, Some(err.to_string())),
        };

        SystemHealth {
            operations,
            global_disabled,
            active_kill_switches,
            kill_switch_error,
            active_locks: orchestrator.guard().active_locks(),
            scheduler: self.scheduler.status(),
            queue,
            queue_error,
            metrics: orchestrator.observability().metrics().snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SharedClock};
    use crate::config::{BreakerConfig, QueueConfig, SchedulerConfig};
    use crate::queue::{handler_fn, QueueJobRequest, QueueManager};
    use crate::resilience::ResilienceOrchestrator;
    use crate::store::MemoryJobStore;
    use crate::{JobError, JobKind, JobStatus};
    use serde_json::json;
    use std::sync::Arc;

    fn controls() -> OperatorControls<MemoryJobStore> {
        let clock = ManualClock::default();
        let shared: SharedClock = Arc::new(clock);
        let manager = QueueManager::with_config(
            MemoryJobStore::with_clock(shared.clone()),
            ResilienceOrchestrator::in_memory(shared.clone()),
            shared,
            QueueConfig {
                breaker: BreakerConfig::default().with_failure_threshold(1),
                ..QueueConfig::default()
            },
        );
        manager
            .register_handler(handler_fn(JobKind::DealAnalysis, |_| async {
                Err(JobError::failed("model unavailable"))
            }))
            .unwrap();
        OperatorControls::new(Scheduler::new(manager, SchedulerConfig::default()))
    }

    #[tokio::test]
    async fn test_health_reports_open_breaker_and_reset() {
        let controls = controls();
        controls
            .scheduler
            .manager()
            .queue_job(QueueJobRequest {
                kind: "deal_analysis".into(),
                tenant_id: "fund-a".into(),
                trigger_reason: "test".into(),
                subject_ref: None,
                payload: json!({ "deal_id": "d-1" }),
                options: Default::default(),
            })
            .await
            .unwrap();

        controls.force_drain().await.unwrap();

        let health = controls.system_health().await;
        let op = health
            .operations
            .iter()
            .find(|op| op.operation == "process_deal_analysis")
            .unwrap();
        assert_eq!(op.state, CircuitState::Open);
        assert!(!health.is_healthy());
        assert_eq!(health.queue.as_ref().unwrap().count(JobStatus::Failed), 1);

        controls.reset_breaker("process_deal_analysis");
        let health = controls.system_health().await;
        assert!(health.is_healthy());
    }

    #[tokio::test]
    async fn test_health_lists_disabled_operations() {
        let controls = controls();
        controls
            .activate_kill_switch("document_analysis", "vendor outage", "ops")
            .await
            .unwrap();

        let health = controls.system_health().await;
        assert!(!health.global_disabled);
        let op = health
            .operations
            .iter()
            .find(|op| op.operation == "document_analysis")
            .unwrap();
        assert!(op.disabled);

        controls.deactivate_kill_switch("document_analysis", "ops").await.unwrap();
        assert!(controls.system_health().await.active_kill_switches.is_empty());
    }
}
