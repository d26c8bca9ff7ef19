pub mod metrics;
pub mod tracing;
pub mod analytics;

pub use metrics::{LiveMetrics, MetricsSnapshot};
pub use analytics::{ObservabilityLayer, BoxStream};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::init_tracing;
