use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobKind};

/// Structured events for the operator-facing audit and notification surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    JobEnqueued {
        job_id: JobId,
        tenant_id: String,
        queue: String,
        kind: JobKind,
        trigger_reason: String,
        at: DateTime<Utc>,
    },

    JobCompleted {
        job_id: JobId,
        tenant_id: String,
        at: DateTime<Utc>,
    },

    JobFailed {
        job_id: JobId,
        tenant_id: String,
        error: String,
        at: DateTime<Utc>,
    },

    /// Skipped by admission control and returned to the queue
    JobRequeued {
        job_id: JobId,
        tenant_id: String,
        reason: String,
        at: DateTime<Utc>,
    },

    /// Summary of one `process_queue` call
    BatchProcessed {
        queue: String,
        worker_id: String,
        processed: usize,
        failed: usize,
        requeued: usize,
        at: DateTime<Utc>,
    },

    KillSwitchActivated {
        scope: String,
        reason: String,
        actor: String,
        at: DateTime<Utc>,
    },

    KillSwitchDeactivated {
        scope: String,
        actor: String,
        at: DateTime<Utc>,
    },

    BreakerOpened {
        operation: String,
        reason: String,
        at: DateTime<Utc>,
    },

    BreakerHalfOpened {
        operation: String,
        at: DateTime<Utc>,
    },

    BreakerClosed {
        operation: String,
        at: DateTime<Utc>,
    },

    BreakerReset {
        operation: String,
        at: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JobEnqueued { .. } => "job_enqueued",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::JobRequeued { .. } => "job_requeued",
            Self::BatchProcessed { .. } => "batch_processed",
            Self::KillSwitchActivated { .. } => "kill_switch_activated",
            Self::KillSwitchDeactivated { .. } => "kill_switch_deactivated",
            Self::BreakerOpened { .. } => "breaker_opened",
            Self::BreakerHalfOpened { .. } => "breaker_half_opened",
            Self::BreakerClosed { .. } => "breaker_closed",
            Self::BreakerReset { .. } => "breaker_reset",
        }
    }

    /// Get the job ID for job lifecycle events
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::JobEnqueued { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobRequeued { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::JobEnqueued { at, .. }
            | Self::JobCompleted { at, .. }
            | Self::JobFailed { at, .. }
            | Self::JobRequeued { at, .. }
            | Self::BatchProcessed { at, .. }
            | Self::KillSwitchActivated { at, .. }
            | Self::KillSwitchDeactivated { at, .. }
            | Self::BreakerOpened { at, .. }
            | Self::BreakerHalfOpened { at, .. }
            | Self::BreakerClosed { at, .. }
            | Self::BreakerReset { at, .. } => at,
        }
    }
}
