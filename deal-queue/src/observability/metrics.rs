use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::JobKind;

/// Live counters for queue and admission-control activity
#[derive(Debug, Default)]
pub struct LiveMetrics {
    jobs_enqueued: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_requeued: AtomicU64,
    breaker_opens: AtomicU64,
    kill_switch_activations: AtomicU64,

    // Per-kind enqueue counts
    enqueued_by_kind: RwLock<HashMap<JobKind, u64>>,

    // Admission rejections keyed by skip reason
    skips_by_reason: RwLock<HashMap<String, u64>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_jobs_enqueued(&self, kind: JobKind) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
        *self.enqueued_by_kind.write().entry(kind).or_insert(0) += 1;
    }

    pub fn increment_jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_jobs_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_jobs_requeued(&self) {
        self.jobs_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_breaker_opens(&self) {
        self.breaker_opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_kill_switch_activations(&self) {
        self.kill_switch_activations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self, reason: &str) {
        *self.skips_by_reason.write().entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn jobs_enqueued(&self) -> u64 {
        self.jobs_enqueued.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_requeued(&self) -> u64 {
        self.jobs_requeued.load(Ordering::Relaxed)
    }

    pub fn breaker_opens(&self) -> u64 {
        self.breaker_opens.load(Ordering::Relaxed)
    }

    pub fn skips(&self, reason: &str) -> u64 {
        self.skips_by_reason.read().get(reason).copied().unwrap_or(0)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued(),
            jobs_completed: self.jobs_completed(),
            jobs_failed: self.jobs_failed(),
            jobs_requeued: self.jobs_requeued(),
            breaker_opens: self.breaker_opens(),
            kill_switch_activations: self.kill_switch_activations.load(Ordering::Relaxed),
            enqueued_by_kind: self.enqueued_by_kind.read().clone(),
            skips_by_reason: self.skips_by_reason.read().clone(),
        }
    }
}

/// Serializable view of [`LiveMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub jobs_enqueued: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_requeued: u64,
    pub breaker_opens: u64,
    pub kill_switch_activations: u64,
    pub enqueued_by_kind: HashMap<JobKind, u64>,
    pub skips_by_reason: HashMap<String, u64>,
}

impl MetricsSnapshot {
    /// Completed share of finished jobs, as a percentage
    pub fn success_rate(&self) -> f64 {
        let finished = self.jobs_completed + self.jobs_failed;
        if finished == 0 {
            100.0
        } else {
            (self.jobs_completed as f64 / finished as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let metrics = LiveMetrics::new();
        metrics.increment_jobs_enqueued(JobKind::DealAnalysis);
        metrics.increment_jobs_enqueued(JobKind::DealAnalysis);
        metrics.increment_jobs_completed();
        metrics.increment_jobs_failed();
        metrics.record_skip("operation in progress");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_enqueued, 2);
        assert_eq!(snapshot.enqueued_by_kind.get(&JobKind::DealAnalysis), Some(&2));
        assert_eq!(metrics.skips("operation in progress"), 1);
        assert_eq!(snapshot.success_rate(), 50.0);
    }
}
