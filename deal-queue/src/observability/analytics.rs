use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::debug;

use super::LiveMetrics;
use crate::types::AuditEvent;

/// Type alias for boxed streams
pub type BoxStream<T> = std::pin::Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'static>>;

/// Audit sink shared by every component: broadcasts structured events and
/// keeps live counters in step with them.
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<AuditEvent>,
    metrics: Arc<LiveMetrics>,
}

impl ObservabilityLayer {
    /// Create new observability layer
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(10000);

        Self {
            event_broadcaster,
            metrics: Arc::new(LiveMetrics::new()),
        }
    }

    /// Publish an event and update the matching counters
    pub fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::JobEnqueued { kind, .. } => self.metrics.increment_jobs_enqueued(*kind),
            AuditEvent::JobCompleted { .. } => self.metrics.increment_jobs_completed(),
            AuditEvent::JobFailed { .. } => self.metrics.increment_jobs_failed(),
            AuditEvent::JobRequeued { .. } => self.metrics.increment_jobs_requeued(),
            AuditEvent::BreakerOpened { .. } => self.metrics.increment_breaker_opens(),
            AuditEvent::KillSwitchActivated { .. } => self.metrics.increment_kill_switch_activations(),
            _ => {}
        }

        debug!(event = event.event_name(), "Recorded audit event");
        // No subscribers is fine
        let _ = self.event_broadcaster.send(event);
    }

    /// Raw broadcast receiver
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.event_broadcaster.subscribe()
    }

    /// Event stream for the operator-facing surface. Lagged events are dropped.
    pub fn event_stream(&self) -> BoxStream<AuditEvent> {
        let stream = BroadcastStream::new(self.event_broadcaster.subscribe())
            .filter_map(|result| result.ok());

        Box::pin(stream)
    }

    /// Get live metrics
    pub fn metrics(&self) -> &LiveMetrics {
        &self.metrics
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}
