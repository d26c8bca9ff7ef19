//! Job store boundary.
//!
//! The durable table of job rows is owned by an external collaborator; the
//! queue only needs the narrow interface below. [`memory::MemoryJobStore`] is
//! the in-process reference implementation used by tests and single-node
//! deployments.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobRecord, JobStatus, QueueResult};

pub use memory::MemoryJobStore;

/// Restricts which rows a claim may take
#[derive(Debug, Clone)]
pub struct ClaimFilter {
    /// Rows with `not_before > now` are never claimed
    pub now: DateTime<Utc>,
    /// Recorded on every claimed row
    pub worker_id: String,
    /// Limit the claim to one tenant
    pub tenant_id: Option<String>,
}

impl ClaimFilter {
    pub fn new(now: DateTime<Utc>, worker_id: impl Into<String>) -> Self {
        Self {
            now,
            worker_id: worker_id.into(),
            tenant_id: None,
        }
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// Per-status row counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub counts: HashMap<JobStatus, usize>,
}

impl QueueStats {
    pub fn count(&self, status: JobStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Storage primitives for job rows
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new queued row; the store assigns its insertion sequence
    async fn insert(&self, record: JobRecord) -> QueueResult<JobId>;

    /// Atomically move up to `limit` eligible rows of `queue` from queued to
    /// claimed, highest priority first and oldest first within a priority.
    /// Either every returned row was claimed by this call or the call fails.
    async fn claim_batch(
        &self,
        queue: &str,
        limit: usize,
        filter: &ClaimFilter,
    ) -> QueueResult<Vec<JobRecord>>;

    /// Move a row to `status`, rejecting transitions the lifecycle forbids
    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_detail: Option<String>,
    ) -> QueueResult<()>;

    /// Delete terminal rows that finished before `before`
    async fn delete_expired(&self, before: DateTime<Utc>) -> QueueResult<usize>;

    /// Mark claimed or processing rows claimed before `claimed_before` as expired
    async fn expire_stale(&self, claimed_before: DateTime<Utc>) -> QueueResult<usize>;

    /// Fetch one row
    async fn get(&self, id: JobId) -> QueueResult<JobRecord>;

    /// Row counts, optionally for one tenant
    async fn stats(&self, tenant_id: Option<&str>) -> QueueResult<QueueStats>;
}
