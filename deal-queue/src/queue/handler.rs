use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{JobError, JobKind, JobRecord, QueueError, QueueResult};

/// Runs jobs of one kind. Handlers must tolerate being retried: a skipped
/// job goes back to the queue and may be handed out again.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Kind this handler processes
    fn kind(&self) -> JobKind;

    /// Process one claimed job
    async fn handle(&self, job: &JobRecord) -> Result<(), JobError>;
}

/// Handler backed by an async closure
pub struct FnHandler<F> {
    kind: JobKind,
    f: F,
}

/// Wrap an async closure as a [`JobHandler`]
pub fn handler_fn<F, Fut>(kind: JobKind, f: F) -> FnHandler<F>
where
    F: Fn(JobRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send,
{
    FnHandler { kind, f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send,
{
    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn handle(&self, job: &JobRecord) -> Result<(), JobError> {
        (self.f)(job.clone()).await
    }
}

/// Registry mapping job kinds to handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; each kind may have only one
    pub fn register<H: JobHandler + 'static>(&mut self, handler: H) -> QueueResult<()> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(QueueError::Internal(format!("Handler for '{}' already registered", kind)));
        }

        self.handlers.insert(kind, Arc::new(handler));
        Ok(())
    }

    /// Builder-style registration
    pub fn with<H: JobHandler + 'static>(mut self, handler: H) -> QueueResult<Self> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn is_registered(&self, kind: JobKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds in allow-list order
    pub fn registered_kinds(&self) -> Vec<JobKind> {
        JobKind::all()
            .iter()
            .copied()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobPayload, JobPriority};
    use chrono::Utc;

    struct ScoreDeal;

    #[async_trait]
    impl JobHandler for ScoreDeal {
        fn kind(&self) -> JobKind {
            JobKind::DealAnalysis
        }

        async fn handle(&self, job: &JobRecord) -> Result<(), JobError> {
            match &job.payload {
                JobPayload::DealAnalysis(payload) if !payload.deal_id.is_empty() => Ok(()),
                other => Err(JobError::failed(format!("unexpected payload: {:?}", other))),
            }
        }
    }

    fn record(payload: JobPayload) -> JobRecord {
        let now = Utc::now();
        let subject = payload.subject_id().to_string();
        JobRecord::new(
            "tenant".into(),
            payload.kind().default_queue().into(),
            payload,
            subject,
            JobPriority::Normal,
            now,
            "test".into(),
            now,
        )
    }

    #[tokio::test]
    async fn test_handler_registry() {
        let mut registry = HandlerRegistry::new();
        registry.register(ScoreDeal).unwrap();
        registry
            .register(handler_fn(JobKind::NoteAnalysis, |_job| async { Ok(()) }))
            .unwrap();

        assert!(registry.is_registered(JobKind::DealAnalysis));
        assert!(!registry.is_registered(JobKind::StrategyChange));
        assert_eq!(
            registry.registered_kinds(),
            vec![JobKind::DealAnalysis, JobKind::NoteAnalysis]
        );

        let handler = registry.get(JobKind::DealAnalysis).unwrap();
        assert!(handler.handle(&record(JobPayload::deal("d-1"))).await.is_ok());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = HandlerRegistry::new();
        registry.register(ScoreDeal).unwrap();

        let result = registry.register(ScoreDeal);
        assert!(matches!(result, Err(QueueError::Internal(_))));
    }
}
