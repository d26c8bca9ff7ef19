use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{ClaimFilter, JobStore, QueueStats};
use crate::clock::{system_clock, SharedClock};
use crate::{JobId, JobRecord, JobStatus, QueueError, QueueResult};

// queue name -> job ids in insertion order
type QueueIndex = HashMap<String, Vec<JobId>>;

/// In-memory job store for testing and single-process deployments.
/// Clones share the same rows.
#[derive(Clone)]
pub struct MemoryJobStore {
    /// Job records indexed by id
    pub(crate) jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,

    /// Queue membership; terminal rows are pruned lazily on claim
    queues: Arc<RwLock<QueueIndex>>,

    sequence: Arc<AtomicU64>,

    /// Simulated outage: every call fails with a store error while set
    unavailable: Arc<AtomicBool>,

    clock: SharedClock,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            queues: Arc::new(RwLock::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
            unavailable: Arc::new(AtomicBool::new(false)),
            clock,
        }
    }

    /// Make every subsequent call fail (test helper for infrastructure outages)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of rows held, in any status
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::store("job store unavailable"));
        }
        Ok(())
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, mut record: JobRecord) -> QueueResult<JobId> {
        self.check_available()?;

        let mut jobs = self.jobs.write();
        if jobs.contains_key(&record.id) {
            return Err(QueueError::store(format!("duplicate job id {}", record.id)));
        }

        record.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let job_id = record.id;

        self.queues
            .write()
            .entry(record.queue.clone())
            .or_default()
            .push(job_id);
        jobs.insert(job_id, record);

        Ok(job_id)
    }

    async fn claim_batch(
        &self,
        queue: &str,
        limit: usize,
        filter: &ClaimFilter,
    ) -> QueueResult<Vec<JobRecord>> {
        self.check_available()?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Both locks held for the whole claim: no other caller can observe or
        // take a row between selection and the queued -> claimed update.
        let mut jobs = self.jobs.write();
        let mut queues = self.queues.write();
        let Some(members) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        members.retain(|id| jobs.get(id).is_some_and(|record| !record.status.is_terminal()));

        let mut eligible: Vec<&JobRecord> = members
            .iter()
            .filter_map(|id| jobs.get(id))
            .filter(|record| record.is_eligible(filter.now))
            .filter(|record| {
                filter
                    .tenant_id
                    .as_deref()
                    .map_or(true, |tenant| record.tenant_id == tenant)
            })
            .collect();

        eligible.sort_by_key(|record| (Reverse(record.priority), record.created_at, record.sequence));
        let selected: Vec<JobId> = eligible.into_iter().take(limit).map(|record| record.id).collect();

        let mut claimed = Vec::with_capacity(selected.len());
        for id in selected {
            if let Some(record) = jobs.get_mut(&id) {
                record.transition(JobStatus::Claimed, None, filter.now)?;
                record.worker_id = Some(filter.worker_id.clone());
                claimed.push(record.clone());
            }
        }

        Ok(claimed)
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_detail: Option<String>,
    ) -> QueueResult<()> {
        self.check_available()?;
        let now = self.clock.now();

        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(&id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        record.transition(status, error_detail, now)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> QueueResult<usize> {
        self.check_available()?;

        let mut jobs = self.jobs.write();
        let doomed: Vec<JobId> = jobs
            .values()
            .filter(|record| record.status.is_terminal())
            .filter(|record| record.completed_at.unwrap_or(record.updated_at) < before)
            .map(|record| record.id)
            .collect();

        for id in &doomed {
            jobs.remove(id);
        }

        let mut queues = self.queues.write();
        for members in queues.values_mut() {
            members.retain(|id| jobs.contains_key(id));
        }

        Ok(doomed.len())
    }

    async fn expire_stale(&self, claimed_before: DateTime<Utc>) -> QueueResult<usize> {
        self.check_available()?;
        let now = self.clock.now();

        let mut jobs = self.jobs.write();
        let mut expired = 0;
        for record in jobs.values_mut() {
            let stale = record.status.is_in_flight()
                && record.claimed_at.map_or(false, |claimed_at| claimed_at < claimed_before);
            if stale {
                record.transition(JobStatus::Expired, Some("claim abandoned".to_string()), now)?;
                expired += 1;
            }
        }

        Ok(expired)
    }

    async fn get(&self, id: JobId) -> QueueResult<JobRecord> {
        self.check_available()?;

        self.jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    async fn stats(&self, tenant_id: Option<&str>) -> QueueResult<QueueStats> {
        self.check_available()?;

        let mut stats = QueueStats::default();
        for record in self.jobs.read().values() {
            if tenant_id.map_or(true, |tenant| record.tenant_id == tenant) {
                *stats.counts.entry(record.status).or_insert(0) += 1;
            }
        }

        Ok(stats)
    }
}
