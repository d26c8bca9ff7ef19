use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobKind, JobPayload, JobPriority};

/// Job status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a drain
    Queued,

    /// Taken by a worker, not yet started
    Claimed,

    /// Handler is running
    Processing,

    /// Handler returned successfully
    Completed,

    /// Handler failed, or the job was skipped by a kill switch
    Failed,

    /// Abandoned by a crashed worker and expired by cleanup
    Expired,
}

impl JobStatus {
    pub fn all() -> &'static [JobStatus] {
        &[
            Self::Queued,
            Self::Claimed,
            Self::Processing,
            Self::Completed,
            Self::Failed,
            Self::Expired,
        ]
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Check if a worker currently holds the job
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Claimed | Self::Processing)
    }

    /// Forward-only lifecycle. The only way back to `Queued` is returning a
    /// skipped job that never ran.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Claimed)
                | (Claimed, Processing)
                | (Claimed, Queued)
                | (Claimed, Failed)
                | (Processing, Queued)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Queued, Expired)
                | (Claimed, Expired)
                | (Processing, Expired)
        )
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Job record - the row owned by the job store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier
    pub id: JobId,

    /// Handler selector
    pub kind: JobKind,

    /// Owning tenant
    pub tenant_id: String,

    /// Queue the job drains from
    pub queue: String,

    /// Typed handler input
    pub payload: JobPayload,

    /// Entity the job works on (deal id, document id, ...)
    pub subject_ref: String,

    pub priority: JobPriority,

    /// Earliest eligible execution time
    pub not_before: DateTime<Utc>,

    pub status: JobStatus,

    /// Who or what enqueued the job, for audit
    pub trigger_reason: String,

    /// Worker that last claimed the job
    pub worker_id: Option<String>,

    /// Number of times a handler was started for this job
    pub attempts: u32,

    /// Last error detail (if any)
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    /// Insertion order assigned by the store; breaks `created_at` ties
    pub sequence: u64,
}

impl JobRecord {
    /// Create a queued job record
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: String,
        queue: String,
        payload: JobPayload,
        subject_ref: String,
        priority: JobPriority,
        not_before: DateTime<Utc>,
        trigger_reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            kind: payload.kind(),
            tenant_id,
            queue,
            payload,
            subject_ref,
            priority,
            not_before,
            status: JobStatus::Queued,
            trigger_reason,
            worker_id: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            claimed_at: None,
            completed_at: None,
            updated_at: now,
            sequence: 0,
        }
    }

    /// Check if a drain at `now` may claim this job
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued && self.not_before <= now
    }

    /// Apply a status change, enforcing the forward-only lifecycle
    pub fn transition(
        &mut self,
        next: JobStatus,
        error_detail: Option<String>,
        now: DateTime<Utc>,
    ) -> crate::QueueResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::QueueError::InvalidTransition {
                job_id: self.id.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        match next {
            JobStatus::Queued => {
                self.worker_id = None;
                self.claimed_at = None;
            }
            JobStatus::Claimed => self.claimed_at = Some(now),
            JobStatus::Processing => self.attempts += 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired => self.completed_at = Some(now),
        }

        if error_detail.is_some() {
            self.last_error = error_detail;
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}
