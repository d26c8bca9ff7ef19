pub mod ids;
pub mod ctx;
pub mod kind;
pub mod record;
pub mod priority;
pub mod events;

pub use ids::JobId;
pub use ctx::QueueCtx;
pub use kind::{
    JobKind, JobPayload, DealAnalysisPayload, DocumentAnalysisPayload,
    StrategyChangePayload, NoteAnalysisPayload,
};
pub use record::{JobRecord, JobStatus};
pub use priority::JobPriority;
pub use events::AuditEvent;
