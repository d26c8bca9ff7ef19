use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::manager::{CleanupReport, QueueManager};
use crate::store::JobStore;
use crate::{QueueError, QueueResult};

/// Background task running [`QueueManager::cleanup`] on an interval
pub struct RetentionReaper<S: JobStore> {
    manager: QueueManager<S>,
    interval: Duration,
}

/// Handle for stopping a spawned reaper
pub struct ReaperHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for its loop to exit
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Reaper join error: {}", e)))
    }
}

impl<S: JobStore + 'static> RetentionReaper<S> {
    /// Reaper using the manager's configured cleanup interval
    pub fn new(manager: QueueManager<S>) -> Self {
        let interval = manager.config().cleanup_interval;
        Self { manager, interval }
    }

    pub fn with_interval(manager: QueueManager<S>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run one cleanup cycle
    pub async fn run_once(&self) -> QueueResult<CleanupReport> {
        self.manager.cleanup().await
    }

    /// Spawn the cleanup loop. The first cycle runs immediately.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let join_handle = tokio::spawn(async move {
            let period = self.interval.max(Duration::from_millis(1));
            let mut ticker = interval(period);
            info!("Starting retention reaper with interval: {:?}", period);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Retention reaper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(report) if report == CleanupReport::default() => debug!("Nothing to clean up"),
                            Ok(report) => debug!(?report, "Cleanup cycle finished"),
                            Err(e) => warn!("Error during cleanup: {}", e),
                        }
                    }
                }
            }
        });

        ReaperHandle {
            shutdown_tx,
            join_handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{system_clock, SharedClock};
    use crate::queue::QueueJobRequest;
    use crate::resilience::ResilienceOrchestrator;
    use crate::store::{ClaimFilter, MemoryJobStore};
    use crate::JobStatus;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_reaper_expires_abandoned_claims() {
        let clock: SharedClock = system_clock();
        let manager = QueueManager::with_config(
            MemoryJobStore::with_clock(clock.clone()),
            ResilienceOrchestrator::in_memory(clock.clone()),
            clock,
            crate::config::QueueConfig {
                stale_claim_timeout: Duration::ZERO,
                ..Default::default()
            },
        );

        let job_id = manager
            .queue_job(QueueJobRequest {
                kind: "strategy_change".into(),
                tenant_id: "fund-a".into(),
                trigger_reason: "strategy edited".into(),
                subject_ref: None,
                payload: json!({ "strategy_id": "s-1", "changed_fields": ["sector"] }),
                options: Default::default(),
            })
            .await
            .unwrap();
        manager
            .store()
            .claim_batch("strategy_change", 1, &ClaimFilter::new(Utc::now(), "gone"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let handle = RetentionReaper::with_interval(manager.clone(), Duration::from_millis(10)).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await.unwrap();

        assert_eq!(manager.get_job(job_id).await.unwrap().status, JobStatus::Expired);
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let clock: SharedClock = system_clock();
        let manager = QueueManager::new(
            MemoryJobStore::with_clock(clock.clone()),
            ResilienceOrchestrator::in_memory(clock.clone()),
            clock,
        );

        let handle = RetentionReaper::with_interval(manager, Duration::ZERO).spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown().await.unwrap();
    }
}
