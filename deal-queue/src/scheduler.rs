//! Timer-driven queue draining with a mandatory cooldown.
//!
//! Each tick checks the cooldown first and does nothing else while it is
//! active. A tick that gets past the cooldown counts as an attempt and moves
//! `last_run` forward, whether it drains, fails, or stops at the kill switch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{to_chrono, SharedClock};
use crate::config::SchedulerConfig;
use crate::queue::{ProcessSummary, QueueManager};
use crate::resilience::KillSwitchScope;
use crate::store::JobStore;
use crate::QueueResult;

/// Slack allowed when a timer tick wakes slightly before the cooldown ends
const COOLDOWN_TOLERANCE: Duration = Duration::from_secs(1);

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No recurring timer
    Stopped,
    /// Timer running, next tick may drain
    Idle,
    /// Timer running, ticks are skipped until the cooldown elapses
    CoolingDown,
    /// A drain attempt is in progress
    Running,
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Skipped without touching kill switches or breakers
    CoolingDown { remaining: Duration },
    /// The global kill switch is on; nothing was claimed
    KillSwitchActive,
    Drained(ProcessSummary),
}

/// Scheduler state for operator surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub queue_name: String,
    pub last_run: Option<DateTime<Utc>>,
    /// Earliest time a regular tick will drain again
    pub next_eligible: Option<DateTime<Utc>>,
}

struct TimerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

struct SchedulerInner<S: JobStore> {
    manager: QueueManager<S>,
    config: SchedulerConfig,
    clock: SharedClock,
    last_run: Mutex<Option<DateTime<Utc>>>,
    running: AtomicBool,
    timer: Mutex<Option<TimerHandle>>,
}

/// Periodically drains one queue through the [`QueueManager`]
pub struct Scheduler<S: JobStore> {
    inner: Arc<SchedulerInner<S>>,
}

impl<S: JobStore> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Clears the running flag on every exit path
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<S: JobStore + 'static> Scheduler<S> {
    pub fn new(manager: QueueManager<S>, config: SchedulerConfig) -> Self {
        let clock = manager.clock().clone();
        Self {
            inner: Arc::new(SchedulerInner {
                manager,
                config,
                clock,
                last_run: Mutex::new(None),
                running: AtomicBool::new(false),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn manager(&self) -> &QueueManager<S> {
        &self.inner.manager
    }

    /// Start the recurring timer. If the cooldown has already elapsed, one
    /// tick runs after the startup delay. Calling `start` twice is a no-op.
    pub fn start(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.is_some() {
            debug!("Scheduler already started");
            return;
        }

        let inner = self.inner.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let run_immediately = inner.cooldown_remaining(inner.clock.now()).is_none();
        let period = inner.config.interval.max(Duration::from_millis(1));

        let join_handle = tokio::spawn(async move {
            if run_immediately {
                tokio::select! {
                    _ = &mut shutdown_rx => return,
                    _ = tokio::time::sleep(inner.config.startup_delay) => inner.run_tick().await,
                }
            }

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => inner.run_tick().await,
                }
            }
            debug!("Scheduler timer exited");
        });

        info!(
            queue = %self.inner.config.queue_name,
            interval = ?self.inner.config.interval,
            cooldown = ?self.inner.config.cooldown,
            "Scheduler started"
        );
        *timer = Some(TimerHandle {
            shutdown_tx,
            join_handle,
        });
    }

    /// Cancel the recurring timer. A drain already in progress finishes
    /// first. Idempotent.
    pub async fn stop(&self) {
        let timer = self.inner.timer.lock().take();
        let Some(timer) = timer else {
            return;
        };

        let _ = timer.shutdown_tx.send(());
        if let Err(err) = timer.join_handle.await {
            error!(error = %err, "Scheduler timer task failed");
        }
        info!(queue = %self.inner.config.queue_name, "Scheduler stopped");
    }

    /// One regular tick, subject to the cooldown
    pub async fn tick(&self) -> QueueResult<TickOutcome> {
        self.inner.tick().await
    }

    /// Drain now regardless of the cooldown. Still honours the kill switch.
    /// If the attempt errors, the previous `last_run` is restored.
    #[instrument(skip(self), fields(queue = %self.inner.config.queue_name))]
    pub async fn force_processing(&self) -> QueueResult<TickOutcome> {
        let previous = *self.inner.last_run.lock();
        info!("Forced processing requested");

        let result = self.inner.attempt(self.inner.clock.now()).await;
        if result.is_err() {
            *self.inner.last_run.lock() = previous;
        }
        result
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_run.lock()
    }

    pub fn status(&self) -> SchedulerStatus {
        let last_run = self.last_run();
        SchedulerStatus {
            state: self.state(),
            queue_name: self.inner.config.queue_name.clone(),
            last_run,
            next_eligible: last_run.and_then(|at| at.checked_add_signed(to_chrono(self.inner.config.cooldown))),
        }
    }
}

impl<S: JobStore> SchedulerInner<S> {
    fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last_run = (*self.last_run.lock())?;
        let elapsed = (now - last_run).to_std().unwrap_or(Duration::ZERO);
        self.config
            .cooldown
            .checked_sub(elapsed)
            .filter(|remaining| *remaining > COOLDOWN_TOLERANCE)
    }

    fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else if self.timer.lock().is_none() {
            SchedulerState::Stopped
        } else if self.cooldown_remaining(self.clock.now()).is_some() {
            SchedulerState::CoolingDown
        } else {
            SchedulerState::Idle
        }
    }

    #[instrument(skip(self), fields(queue = %self.config.queue_name))]
    async fn tick(&self) -> QueueResult<TickOutcome> {
        let now = self.clock.now();
        if let Some(remaining) = self.cooldown_remaining(now) {
            debug!(?remaining, "Cooling down, tick skipped");
            return Ok(TickOutcome::CoolingDown { remaining });
        }
        self.attempt(now).await
    }

    async fn attempt(&self, now: DateTime<Utc>) -> QueueResult<TickOutcome> {
        *self.last_run.lock() = Some(now);
        self.running.store(true, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        let kill_switches = self.manager.orchestrator().kill_switches();
        match kill_switches.status(KillSwitchScope::Global).await {
            Ok(true) => {
                info!("Global kill switch active, skipping drain");
                return Ok(TickOutcome::KillSwitchActive);
            }
            Ok(false) => {}
            // A monitoring outage must not halt analysis indefinitely
            Err(err) => warn!(error = %err, "Kill switch status unavailable, proceeding"),
        }

        let summary = self
            .manager
            .process_queue(&self.config.queue_name, &self.config.worker_id, self.config.max_processing_items)
            .await?;
        Ok(TickOutcome::Drained(summary))
    }

    async fn run_tick(&self) {
        match self.tick().await {
            Ok(TickOutcome::Drained(summary)) => {
                debug!(processed = summary.processed, failed = summary.failed, "Scheduled drain finished")
            }
            Ok(_) => {}
            Err(err) => error!(queue = %self.config.queue_name, error = %err, "Scheduled drain failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::queue::{handler_fn, QueueJobRequest};
    use crate::resilience::{KillSwitchRegistry, MemoryKillSwitchStore, ResilienceOrchestrator};
    use crate::store::MemoryJobStore;
    use crate::{JobKind, QueueError};
    use serde_json::json;

    fn scheduler(config: SchedulerConfig) -> (Scheduler<MemoryJobStore>, ManualClock) {
        let clock = ManualClock::default();
        let shared: SharedClock = Arc::new(clock.clone());
        let manager = QueueManager::new(
            MemoryJobStore::with_clock(shared.clone()),
            ResilienceOrchestrator::in_memory(shared.clone()),
            shared,
        );
        manager
            .register_handler(handler_fn(JobKind::DealAnalysis, |_| async { Ok(()) }))
            .unwrap();
        (Scheduler::new(manager, config), clock)
    }

    async fn enqueue(scheduler: &Scheduler<MemoryJobStore>, count: usize) {
        for i in 0..count {
            scheduler
                .inner
                .manager
                .queue_job(QueueJobRequest {
                    kind: "deal_analysis".into(),
                    tenant_id: "fund-a".into(),
                    trigger_reason: "import".into(),
                    subject_ref: None,
                    payload: json!({ "deal_id": format!("d-{}", i) }),
                    options: Default::default(),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_cooldown_skip_does_not_move_last_run() {
        let (scheduler, clock) = scheduler(SchedulerConfig::default());
        enqueue(&scheduler, 1).await;

        assert!(matches!(scheduler.tick().await.unwrap(), TickOutcome::Drained(_)));
        let first = scheduler.last_run();

        clock.advance(chrono::Duration::minutes(1));
        assert!(matches!(
            scheduler.tick().await.unwrap(),
            TickOutcome::CoolingDown { .. }
        ));
        assert_eq!(scheduler.last_run(), first);
    }

    #[tokio::test]
    async fn test_early_wakeup_within_tolerance_still_drains() {
        let (scheduler, clock) = scheduler(SchedulerConfig::default());
        enqueue(&scheduler, 2).await;
        let cooldown = scheduler.config().cooldown;

        assert!(matches!(scheduler.tick().await.unwrap(), TickOutcome::Drained(_)));
        enqueue(&scheduler, 1).await;

        clock.advance_std(cooldown - Duration::from_secs(5));
        assert!(matches!(
            scheduler.tick().await.unwrap(),
            TickOutcome::CoolingDown { .. }
        ));

        // Timer fired half a second before the cooldown deadline
        clock.advance_std(Duration::from_millis(4500));
        assert!(matches!(scheduler.tick().await.unwrap(), TickOutcome::Drained(_)));
    }

    #[tokio::test]
    async fn test_kill_switch_attempt_moves_last_run() {
        let (scheduler, _) = scheduler(SchedulerConfig::default());
        scheduler
            .inner
            .manager
            .orchestrator()
            .kill_switches()
            .activate(KillSwitchScope::Global, "incident", "ops")
            .await
            .unwrap();

        assert_eq!(scheduler.force_processing().await.unwrap(), TickOutcome::KillSwitchActive);
        assert!(scheduler.last_run().is_some());
    }

    #[tokio::test]
    async fn test_kill_switch_read_failure_fails_open() {
        let clock = ManualClock::default();
        let shared: SharedClock = Arc::new(clock.clone());
        let switch_store = MemoryKillSwitchStore::new();
        let orchestrator = ResilienceOrchestrator::in_memory(shared.clone());
        let orchestrator = ResilienceOrchestrator::new(
            Arc::new(KillSwitchRegistry::new(
                Arc::new(switch_store.clone()),
                shared.clone(),
                orchestrator.observability().clone(),
            )),
            orchestrator.breakers().clone(),
            orchestrator.guard().clone(),
            orchestrator.observability().clone(),
        );
        let manager = QueueManager::new(MemoryJobStore::with_clock(shared.clone()), orchestrator, shared);
        let scheduler = Scheduler::new(manager, SchedulerConfig::default());

        switch_store.set_fail_reads(true);
        // The scheduler proceeds; the orchestrator still fails closed per job
        assert!(matches!(scheduler.tick().await.unwrap(), TickOutcome::Drained(_)));
    }

    #[tokio::test]
    async fn test_failed_force_restores_last_run() {
        let (scheduler, clock) = scheduler(SchedulerConfig::default());
        scheduler.tick().await.unwrap();
        let before = scheduler.last_run();

        clock.advance(chrono::Duration::minutes(1));
        scheduler.inner.manager.store().set_unavailable(true);
        assert!(matches!(scheduler.force_processing().await, Err(QueueError::Store(_))));
        assert_eq!(scheduler.last_run(), before);
    }

    #[tokio::test]
    async fn test_start_runs_immediate_tick_and_stop_is_idempotent() {
        let config = SchedulerConfig {
            startup_delay: Duration::from_millis(5),
            interval: Duration::from_secs(3600),
            ..SchedulerConfig::default()
        };
        let (scheduler, _) = scheduler(config);
        enqueue(&scheduler, 2).await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        scheduler.start();
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(scheduler.last_run().is_some());
        assert_eq!(scheduler.state(), SchedulerState::CoolingDown);

        scheduler.stop().await;
        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
