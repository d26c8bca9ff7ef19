use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure and validation errors for queue operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error("Unknown job kind: {0}")]
    UnknownJobKind(String),

    #[error("Invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Kill switch store error: {0}")]
    KillSwitchStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Create a job store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a kill switch store error
    pub fn kill_switch_store(msg: impl Into<String>) -> Self {
        Self::KillSwitchStore(msg.into())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Job execution failure reported by a handler (or by the orchestrator on its behalf)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The handler returned an error
    #[error("Job failed: {0}")]
    Failed(String),

    /// The handler panicked; caught at the orchestrator boundary
    #[error("Job panicked: {0}")]
    Panicked(String),

    /// No handler is registered for the job's kind
    #[error("No handler registered for job kind: {0}")]
    Unhandled(String),
}

impl JobError {
    /// Create a handler failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Failed(msg) | Self::Panicked(msg) | Self::Unhandled(msg) => msg,
        }
    }

    /// Human-readable message for operator-facing surfaces
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Failed(_) => "analysis failed",
            Self::Panicked(_) => "analysis crashed unexpectedly",
            Self::Unhandled(_) => "analysis type is not supported",
        }
    }
}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        Self::Failed(err.to_string())
    }
}
