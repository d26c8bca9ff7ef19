//! Job submission and guarded queue draining.

pub mod handler;
pub mod manager;
pub mod reaper;

pub use handler::{handler_fn, FnHandler, HandlerRegistry, JobHandler};
pub use manager::{
    CleanupReport, EnqueueOptions, ProcessSummary, QueueJobRequest, QueueManager, KILL_SWITCH_SKIP_DETAIL,
};
pub use reaper::{ReaperHandle, RetentionReaper};
